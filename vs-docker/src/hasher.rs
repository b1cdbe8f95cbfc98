use std::hash::{Hash, Hasher};

/// Feeds anything implementing `Hash` into a cryptographic digest.
pub trait DigestHasher {
    fn input<I: Hash>(&mut self, input: I);
}

impl DigestHasher for blake3::Hasher {
    fn input<I: Hash>(&mut self, input: I) {
        struct StdHasher<'a>(&'a mut blake3::Hasher);

        impl<'a> Hasher for StdHasher<'a> {
            fn finish(&self) -> u64 {
                unreachable!("digest is read with blake3::Hasher::finalize")
            }

            fn write(&mut self, bytes: &[u8]) {
                self.0.update(bytes);
            }
        }

        input.hash(&mut StdHasher(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_give_equal_digests() {
        let digest = |path: &str, len: u64| {
            let mut hasher = blake3::Hasher::new();
            hasher.input((path, len));
            hasher.finalize()
        };

        assert_eq!(digest("src/main.rs", 10), digest("src/main.rs", 10));
        assert_ne!(digest("src/main.rs", 10), digest("src/main.rs", 11));
    }
}
