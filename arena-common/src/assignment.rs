// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashSet;

use rand::{
    SeedableRng,
    distr::{Distribution, weighted::WeightedIndex},
    rngs::StdRng,
    seq::SliceRandom,
};
use serde::{Deserialize, Serialize};

use crate::{CandidateModel, GameCountIndex, MatchResult};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("candidate model pool must not be empty")]
    EmptyPool,
    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),
}

/// `Assignment[i]` is the model seated at position `i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Assignment(Vec<CandidateModel>);

impl Assignment {
    pub fn new(models: Vec<CandidateModel>) -> Self {
        Self(models)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn models(&self) -> &[CandidateModel] {
        &self.0
    }

    pub fn model_for(&self, slot: usize) -> Option<&str> {
        self.0.get(slot).map(String::as_str)
    }

    /// Matches roles by slot name when given, otherwise by position.
    pub fn annotate(&self, result: &mut MatchResult, slot_names: Option<&[String]>) {
        match slot_names {
            Some(names) => {
                for role in &mut result.roles {
                    if let Some(slot) = names.iter().position(|name| *name == role.role_name) {
                        role.model_name = self.model_for(slot).map(ToOwned::to_owned);
                    }
                }
            }
            None => {
                for (slot, role) in result.roles.iter_mut().enumerate() {
                    if let Some(model) = self.model_for(slot) {
                        role.model_name = Some(model.to_string());
                    }
                }
            }
        }
    }
}

/// Inverse-play-count weights, normalised to sum to one.
pub fn sampling_weights(pool: &[CandidateModel], counts: &GameCountIndex) -> Vec<f64> {
    let raw: Vec<f64> = pool
        .iter()
        .map(|model| 1.0 / (counts.get(model).copied().unwrap_or(0) as f64 + 1.0))
        .collect();
    let total: f64 = raw.iter().sum();

    if total > 0.0 && total.is_finite() {
        raw.into_iter().map(|weight| weight / total).collect()
    } else {
        vec![1.0 / pool.len() as f64; pool.len()]
    }
}

/// A large enough pool is shuffled then stable-sorted by weight (not exact
/// weighted sampling); a small one seats every model once and draws the rest
/// with replacement.
pub fn assign(
    pool: &[CandidateModel],
    slots: usize,
    counts: &GameCountIndex,
    seed: Option<u64>,
) -> Result<Assignment, PlanError> {
    let pool = dedupe_pool(pool);
    if pool.is_empty() {
        return Err(PlanError::EmptyPool);
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let weights = sampling_weights(&pool, counts);

    let mut assigned: Vec<CandidateModel> = if pool.len() >= slots {
        let mut pairs: Vec<(&CandidateModel, f64)> =
            pool.iter().zip(weights.iter().copied()).collect();
        pairs.shuffle(&mut rng);
        pairs.sort_by(|left, right| right.1.total_cmp(&left.1));
        pairs
            .into_iter()
            .take(slots)
            .map(|(model, _)| model.clone())
            .collect()
    } else {
        let sampler = WeightedIndex::new(&weights)
            .map_err(|error| PlanError::InvalidWeights(error.to_string()))?;
        let mut assigned = pool.clone();
        assigned.extend((pool.len()..slots).map(|_| pool[sampler.sample(&mut rng)].clone()));
        assigned
    };

    assigned.shuffle(&mut rng);
    Ok(Assignment(assigned))
}

fn dedupe_pool(pool: &[CandidateModel]) -> Vec<CandidateModel> {
    let mut seen = HashSet::new();
    pool.iter()
        .filter(|&model| !model.trim().is_empty() && seen.insert(model.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoleOutcome;
    use std::collections::HashMap;

    fn pool(names: &[&str]) -> Vec<CandidateModel> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn outcome(role_name: &str) -> RoleOutcome {
        RoleOutcome {
            role_name: role_name.to_string(),
            final_state: serde_json::Value::Null,
            model_name: None,
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = assign(&[], 5, &HashMap::new(), Some(1)).unwrap_err();
        assert_eq!(err, PlanError::EmptyPool);

        let blank = pool(&["  ", ""]);
        assert_eq!(
            assign(&blank, 2, &HashMap::new(), None).unwrap_err(),
            PlanError::EmptyPool
        );
    }

    #[test]
    fn large_pool_yields_distinct_models_from_pool() {
        let candidates = pool(&["a", "b", "c", "d", "e", "f", "g"]);
        for seed in 0..50 {
            let assignment = assign(&candidates, 5, &HashMap::new(), Some(seed)).unwrap();
            assert_eq!(assignment.len(), 5);
            let unique: HashSet<&String> = assignment.models().iter().collect();
            assert_eq!(unique.len(), 5);
            assert!(assignment.models().iter().all(|m| candidates.contains(m)));
        }
    }

    #[test]
    fn small_pool_seats_every_model_before_repeating() {
        let candidates = pool(&["a", "b", "c"]);
        let counts = HashMap::from([("a".to_string(), 40), ("b".to_string(), 2)]);
        for seed in 0..50 {
            let assignment = assign(&candidates, 7, &counts, Some(seed)).unwrap();
            assert_eq!(assignment.len(), 7);
            for model in &candidates {
                assert!(assignment.models().contains(model), "{model} missing");
            }
        }
    }

    #[test]
    fn duplicate_pool_entries_do_not_repeat_models() {
        let candidates = pool(&["a", "a", "b", "c"]);
        let assignment = assign(&candidates, 3, &HashMap::new(), Some(9)).unwrap();
        let unique: HashSet<&String> = assignment.models().iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn model_names_are_kept_verbatim() {
        let candidates = pool(&[" gpt-4o", "gpt-4o", "gpt-4o "]);
        let assignment = assign(&candidates, 3, &HashMap::new(), Some(2)).unwrap();
        let mut seated = assignment.models().to_vec();
        seated.sort();
        assert_eq!(seated, pool(&[" gpt-4o", "gpt-4o", "gpt-4o "]));
    }

    #[test]
    fn same_seed_reproduces_assignment() {
        let candidates = pool(&["a", "b", "c", "d"]);
        let counts = HashMap::from([("c".to_string(), 3)]);
        for slots in [2, 4, 9] {
            let first = assign(&candidates, slots, &counts, Some(42)).unwrap();
            let second = assign(&candidates, slots, &counts, Some(42)).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn less_played_model_wins_single_slot() {
        let candidates = pool(&["A", "B"]);
        let counts = HashMap::from([("A".to_string(), 0), ("B".to_string(), 10)]);
        let picked_a = (0..1000)
            .filter(|_| {
                let assignment = assign(&candidates, 1, &counts, None).unwrap();
                assignment.model_for(0) == Some("A")
            })
            .count();
        assert!(picked_a > 700, "A picked only {picked_a} times");
    }

    #[test]
    fn heavily_played_model_is_left_out_when_pool_exceeds_slots() {
        let candidates = pool(&["fresh-1", "veteran", "fresh-2"]);
        let counts = HashMap::from([("veteran".to_string(), 100)]);
        for seed in 0..20 {
            let assignment = assign(&candidates, 2, &counts, Some(seed)).unwrap();
            assert!(!assignment.models().contains(&"veteran".to_string()));
        }
    }

    #[test]
    fn weights_are_normalised_inverse_counts() {
        let candidates = pool(&["a", "b"]);
        let counts = HashMap::from([("b".to_string(), 1)]);
        let weights = sampling_weights(&candidates, &counts);
        assert!((weights[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((weights[1] - 1.0 / 3.0).abs() < 1e-9);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn annotate_by_position() {
        let assignment = Assignment::new(pool(&["m0", "m1"]));
        let mut result = MatchResult {
            roles: vec![outcome("Merlin"), outcome("Assassin"), outcome("Servant")],
            details: serde_json::Value::Null,
        };
        assignment.annotate(&mut result, None);
        assert_eq!(result.roles[0].model_name.as_deref(), Some("m0"));
        assert_eq!(result.roles[1].model_name.as_deref(), Some("m1"));
        assert_eq!(result.roles[2].model_name, None);
    }

    #[test]
    fn annotate_by_slot_name() {
        let assignment = Assignment::new(pool(&["m-austria", "m-england"]));
        let names = pool(&["AUSTRIA", "ENGLAND"]);
        let mut result = MatchResult {
            roles: vec![outcome("ENGLAND"), outcome("TURKEY"), outcome("AUSTRIA")],
            details: serde_json::Value::Null,
        };
        assignment.annotate(&mut result, Some(&names));
        assert_eq!(result.roles[0].model_name.as_deref(), Some("m-england"));
        assert_eq!(result.roles[1].model_name, None);
        assert_eq!(result.roles[2].model_name.as_deref(), Some("m-austria"));
    }
}
