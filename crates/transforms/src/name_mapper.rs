//! Collision-free synthetic identifiers.

use indexmap::IndexMap;
use murk_utils::errors::RenameError;
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashSet;

/// Consecutive collisions tolerated before giving up on a fresh name.
pub const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Issues synthetic names of the form `<prefix><random lowercase suffix>` and remembers
/// which original each one replaced.
///
/// A name is never issued twice and never equals a name marked as taken. Mappings are
/// permanent for the lifetime of the mapper.
#[derive(Debug, Clone)]
pub struct NameMapper {
    prefix: String,
    suffix_len: usize,
    max_attempts: usize,
    mapping: IndexMap<String, String>,
    taken: HashSet<String>,
}

impl NameMapper {
    /// Creates an empty mapper issuing `prefix` plus `suffix_len` random letters.
    pub fn new(prefix: impl Into<String>, suffix_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            suffix_len,
            max_attempts: MAX_NAME_ATTEMPTS,
            mapping: IndexMap::new(),
            taken: HashSet::new(),
        }
    }

    /// Overrides the collision retry limit.
    pub const fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Excludes `names` from the synthetic pool.
    pub fn mark_taken<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taken.extend(names.into_iter().map(Into::into));
    }

    /// Returns the synthetic name for `original`, issuing one on first use.
    pub fn reserve(&mut self, original: &str, rng: &mut StdRng) -> Result<String, RenameError> {
        if let Some(existing) = self.mapping.get(original) {
            return Ok(existing.clone());
        }
        let synthetic = self.fresh(rng)?;
        self.mapping.insert(original.to_string(), synthetic.clone());
        Ok(synthetic)
    }

    /// Issues a name that is not recorded against any original.
    pub fn fresh(&mut self, rng: &mut StdRng) -> Result<String, RenameError> {
        for _ in 0..self.max_attempts {
            let mut candidate = String::with_capacity(self.prefix.len() + self.suffix_len);
            candidate.push_str(&self.prefix);
            for _ in 0..self.suffix_len {
                candidate.push(char::from(rng.random_range(b'a'..=b'z')));
            }
            if self.taken.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(RenameError::CollisionExhaustion {
            prefix: self.prefix.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Synthetic name already issued for `original`, if any.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.mapping.get(original).map(String::as_str)
    }

    /// Returns true if `original` has a synthetic name.
    pub fn contains(&self, original: &str) -> bool {
        self.mapping.contains_key(original)
    }

    /// Original to synthetic, in the order names were first reserved.
    pub const fn mapping(&self) -> &IndexMap<String, String> {
        &self.mapping
    }

    /// Consumes the mapper, keeping only the mapping.
    pub fn into_mapping(self) -> IndexMap<String, String> {
        self.mapping
    }

    /// Number of mapped originals.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Returns true if nothing has been mapped.
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn reserve_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut mapper = NameMapper::new("func_", 8);
        let first = mapper.reserve("add", &mut rng).unwrap();
        let again = mapper.reserve("add", &mut rng).unwrap();
        assert_eq!(first, again);
        assert!(first.starts_with("func_"));
        assert_eq!(first.len(), "func_".len() + 8);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn issued_names_avoid_taken_and_each_other() {
        let mut rng = StdRng::seed_from_u64(7);
        // with a one-letter suffix only two names remain free
        let mut mapper = NameMapper::new("v", 1);
        mapper.mark_taken(('a'..='x').map(|c| format!("v{c}")));
        let a = mapper.reserve("one", &mut rng).unwrap();
        let b = mapper.reserve("two", &mut rng).unwrap();
        let mut issued = vec![a, b];
        issued.sort();
        assert_eq!(issued, vec!["vy", "vz"]);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut mapper = NameMapper::new("v", 1).with_max_attempts(200);
        mapper.mark_taken(('a'..='z').map(|c| format!("v{c}")));
        assert_eq!(
            mapper.reserve("x", &mut rng),
            Err(RenameError::CollisionExhaustion {
                prefix: "v".to_string(),
                attempts: 200,
            })
        );
        assert!(mapper.is_empty());
    }
}
