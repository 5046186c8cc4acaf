use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution};
use std::collections::{BTreeMap, BTreeSet};

/// Beta-Bernoulli Thompson sampling bandit over a set of candidates
///
/// Created fresh for one allocation run and discarded afterwards; never
/// persisted. The backup list keeps the bandit serving recommendations after
/// every originally qualifying candidate has been removed.
pub struct BetaBandit<C: Clone + Ord> {
    candidates: Vec<C>,
    backup_candidates: Vec<C>,
    trials: BTreeMap<C, u64>,
    successes: BTreeMap<C, u64>,
    prior: (f64, f64),
    banned: BTreeSet<C>,
}

impl<C: Clone + Ord> BetaBandit<C> {
    /// Create a bandit with uniform priors over the given candidates
    ///
    /// # Arguments
    /// * `candidates` - Candidates eligible for recommendations
    /// * `backup_candidates` - Fallback list used when the active list empties
    /// * `prior` - Beta prior (alpha, beta) shared by all candidates
    pub fn new(candidates: Vec<C>, backup_candidates: Vec<C>, prior: (f64, f64)) -> Self {
        Self {
            candidates,
            backup_candidates,
            trials: BTreeMap::new(),
            successes: BTreeMap::new(),
            prior,
            banned: BTreeSet::new(),
        }
    }

    /// Record one trial outcome for a candidate
    pub fn add_result(&mut self, candidate: &C, success: bool) {
        *self.trials.entry(candidate.clone()).or_insert(0) += 1;
        if success {
            *self.successes.entry(candidate.clone()).or_insert(0) += 1;
        }
    }

    /// Exclude a candidate from recommendations until every remaining
    /// candidate is banned, at which point all bans are lifted
    pub fn temporarily_ban(&mut self, candidate: &C) {
        self.banned.insert(candidate.clone());
    }

    /// Permanently remove a candidate from both lists
    ///
    /// If the active list empties, it is repointed to whatever remains of
    /// the backup list so allocation can keep making progress.
    pub fn remove(&mut self, candidate: &C) {
        self.candidates.retain(|c| c != candidate);
        self.backup_candidates.retain(|c| c != candidate);
        if self.candidates.is_empty() {
            self.candidates = self.backup_candidates.clone();
        }
    }

    /// Sample one Beta posterior draw per candidate and return them sorted
    /// best first
    fn sampled_ranking(&self, rng: &mut StdRng) -> Vec<(C, f64)> {
        let mut sampled: Vec<(C, f64)> = self
            .candidates
            .iter()
            .map(|candidate| {
                let trials = *self.trials.get(candidate).unwrap_or(&0) as f64;
                let successes = *self.successes.get(candidate).unwrap_or(&0) as f64;
                let alpha = self.prior.0 + successes;
                let beta = self.prior.1 + trials - successes;
                let sample = Beta::new(alpha, beta).unwrap().sample(rng);
                (candidate.clone(), sample)
            })
            .collect();
        sampled.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        sampled
    }

    /// Recommend the candidate whose posterior sample is highest
    ///
    /// Banned candidates are skipped; if every candidate is banned, the ban
    /// set is cleared and the top sample is returned anyway, so budget always
    /// goes somewhere as long as any candidate exists. Returns None only when
    /// there are zero candidates left.
    pub fn recommend(&mut self, rng: &mut StdRng) -> Option<C> {
        if self.candidates.is_empty() {
            return None;
        }
        let ranking = self.sampled_ranking(rng);
        for (candidate, _) in &ranking {
            if !self.banned.contains(candidate) {
                return Some(candidate.clone());
            }
        }
        // Everyone is banned; lift all bans and take the best sample
        self.banned.clear();
        ranking.into_iter().next().map(|(candidate, _)| candidate)
    }

    /// Number of candidates still eligible for recommendations
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_converges_to_the_successful_candidate() {
        let mut bandit = BetaBandit::new(vec![0u32, 1, 2], vec![0, 1, 2], (1.0, 1.0));
        for _ in 0..50 {
            bandit.add_result(&1, true);
        }
        // Statistical property: the all-success candidate should win well
        // above the uniform 1/3 rate
        let mut rng = StdRng::seed_from_u64(7);
        let mut wins = 0;
        const DRAWS: u32 = 1000;
        for _ in 0..DRAWS {
            if bandit.recommend(&mut rng) == Some(1) {
                wins += 1;
            }
        }
        assert!(
            wins as f64 / DRAWS as f64 > 0.6,
            "successful candidate recommended only {}/{} times",
            wins,
            DRAWS
        );
    }

    #[test]
    fn test_ban_skips_candidate() {
        let mut bandit = BetaBandit::new(vec![0u32, 1], vec![0, 1], (1.0, 1.0));
        for _ in 0..100 {
            bandit.add_result(&0, true);
            bandit.add_result(&1, false);
        }
        bandit.temporarily_ban(&0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bandit.recommend(&mut rng), Some(1));
    }

    #[test]
    fn test_all_banned_lifts_bans() {
        let mut bandit = BetaBandit::new(vec![0u32, 1], vec![0, 1], (1.0, 1.0));
        bandit.temporarily_ban(&0);
        bandit.temporarily_ban(&1);
        let mut rng = StdRng::seed_from_u64(1);
        // Forward progress is guaranteed: someone is recommended anyway
        assert!(bandit.recommend(&mut rng).is_some());
    }

    #[test]
    fn test_remove_falls_back_to_backup_list() {
        let mut bandit = BetaBandit::new(vec![0u32], vec![0, 1, 2], (1.0, 1.0));
        bandit.remove(&0);
        // Active list emptied and was repointed to the remaining backups
        assert_eq!(bandit.remaining(), 2);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(bandit.recommend(&mut rng), Some(1) | Some(2)));
    }

    #[test]
    fn test_recommend_none_when_exhausted() {
        let mut bandit: BetaBandit<u32> = BetaBandit::new(vec![0], vec![0], (1.0, 1.0));
        bandit.remove(&0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bandit.recommend(&mut rng), None);
    }
}
