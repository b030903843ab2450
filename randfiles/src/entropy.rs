//! Sources of cryptographically strong random bytes.
//!
//! File names and file contents both come from a [`RandomSource`]. A failure
//! to produce randomness is never papered over: callers get an [`Error`] and
//! are expected to stop rather than write predictable data.

use rand::{TryRngCore, rngs::OsRng};

/// Number of random bytes in a file name. Hex encoding doubles this.
pub const NAME_BYTES: usize = 16;

/// Errors produced by a [`RandomSource`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying generator could not supply bytes.
    #[error("Random source unavailable: {0}")]
    Unavailable(String),
}

/// Supplier of cryptographically strong random bytes.
pub trait RandomSource: Send {
    /// Fill `dst` entirely with random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot produce bytes. `dst` contents are
    /// unspecified in that case.
    fn fill(&mut self, dst: &mut [u8]) -> Result<(), Error>;
}

/// The operating system's generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSource;

impl RandomSource for OsSource {
    fn fill(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        OsRng
            .try_fill_bytes(dst)
            .map_err(|err| Error::Unavailable(err.to_string()))
    }
}

/// Produce a fresh file name: [`NAME_BYTES`] random bytes as lowercase hex.
///
/// # Errors
///
/// Returns an error if `source` fails.
pub fn random_name<R>(source: &mut R) -> Result<String, Error>
where
    R: RandomSource + ?Sized,
{
    let mut bytes = [0u8; NAME_BYTES];
    source.fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn name_encodes_source_bytes() {
        // Every byte is 0xAB, so the name is that byte's lowercase hex repeated.
        let mut source = test::Exhausting { remaining: 1 };
        let name = random_name(&mut source).expect("fill should succeed");
        assert_eq!(name, "ab".repeat(NAME_BYTES));
    }

    #[test]
    fn name_is_32_hex_chars() {
        let name = random_name(&mut OsSource).expect("os randomness unavailable");
        assert_eq!(name.len(), NAME_BYTES * 2);
        assert!(
            name.chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn failure_is_reported() {
        let mut source = test::Exhausting { remaining: 0 };
        assert_eq!(
            random_name(&mut source),
            Err(Error::Unavailable("exhausted".to_string()))
        );
    }

    #[test]
    fn two_sources_do_not_collide() {
        let mut names = FxHashSet::default();
        for _ in 0..2 {
            let mut source = OsSource;
            for _ in 0..10_000 {
                let name = random_name(&mut source).expect("os randomness unavailable");
                assert!(names.insert(name), "duplicate name generated");
            }
        }
        assert_eq!(names.len(), 20_000);
    }
}
