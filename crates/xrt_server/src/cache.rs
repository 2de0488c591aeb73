//! Process-wide compilation cache.
//!
//! Compiling verifies a computation and keys it by fingerprint, the hex
//! SHA-256 of its JSON form. Structurally identical computations share one
//! compiled program across every session of the server.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use xrt_core::{Computation, XrtResult};

/// A verified computation ready to execute.
#[derive(Debug)]
pub struct CompiledProgram {
    pub fingerprint: String,
    pub computation: Computation,
}

#[derive(Debug, Default)]
pub struct CompilationCache {
    programs: HashMap<String, Arc<CompiledProgram>>,
    hits: usize,
    misses: usize,
}

pub type SharedCache = Arc<Mutex<CompilationCache>>;

pub fn fingerprint(computation: &Computation) -> XrtResult<String> {
    let json = computation.to_json()?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Return the cached program for `computation`, compiling it on a miss.
    /// The flag is true on a cache hit.
    pub fn get_or_compile(&mut self, computation: Computation) -> XrtResult<(Arc<CompiledProgram>, bool)> {
        let fingerprint = fingerprint(&computation)?;
        if let Some(program) = self.programs.get(&fingerprint) {
            self.hits += 1;
            return Ok((Arc::clone(program), true));
        }

        computation.verify()?;
        let program = Arc::new(CompiledProgram {
            fingerprint: fingerprint.clone(),
            computation,
        });
        self.programs.insert(fingerprint, Arc::clone(&program));
        self.misses += 1;
        Ok((program, false))
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrt_core::{trace, DType, ValueType};

    fn square() -> Computation {
        trace("square", &[ValueType::tensor(DType::F32, [4])], |_, p| p[0].mul(&p[0])).unwrap()
    }

    #[test]
    fn test_same_computation_hits() {
        let mut cache = CompilationCache::new();
        let (first, hit) = cache.get_or_compile(square()).unwrap();
        assert!(!hit);
        let (second, hit) = cache.get_or_compile(square()).unwrap();
        assert!(hit);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((cache.hits(), cache.misses(), cache.len()), (1, 1, 1));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&square()).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));

        let other = trace("square", &[ValueType::tensor(DType::F32, [5])], |_, p| p[0].mul(&p[0])).unwrap();
        assert_ne!(fp, fingerprint(&other).unwrap());
    }

    #[test]
    fn test_invalid_computation_is_not_cached() {
        let mut bad = square();
        let root = bad.root.0;
        bad.nodes[root].ty = ValueType::tensor(DType::F32, [3]);
        let mut cache = CompilationCache::new();
        assert!(cache.get_or_compile(bad).is_err());
        assert!(cache.is_empty());
    }
}
