//! Least-recently-used credential selection
//!
//! Candidates are ordered by `last_used_at` (never-used first) with ties
//! broken by id, then reserved one at a time under each credential's own
//! lock. Ordering is computed from a snapshot, so a candidate that another
//! selector drained in the meantime simply fails its reservation and the scan
//! moves on.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::debug;

use crate::credential::CredentialId;
use crate::limiter::Reservation;
use crate::pool::Pool;

/// Reserve up to `count` distinct credentials not in `excluded`.
///
/// Returns fewer than `count` (possibly none) when the pool cannot currently
/// supply more; the caller decides whether to wait or give up.
pub fn select_eligible(
    pool: &Pool,
    count: usize,
    excluded: &HashSet<CredentialId>,
    now: Instant,
) -> Vec<Reservation> {
    if count == 0 {
        return Vec::new();
    }

    let limiter = pool.limiter();
    let mut candidates: Vec<(Option<Instant>, CredentialId)> = pool
        .credentials()
        .iter()
        .filter(|c| !excluded.contains(&c.id()))
        .filter_map(|c| {
            let state = c.lock();
            limiter
                .next_available_at(&state, now)
                .is_some_and(|at| at <= now)
                .then_some((state.last_used_at, c.id()))
        })
        .collect();
    candidates.sort_unstable();

    let mut reserved = Vec::with_capacity(count.min(candidates.len()));
    for (_, id) in candidates {
        if reserved.len() == count {
            break;
        }
        let credential = pool.credential(id);
        let mut state = credential.lock();
        if let Some(reservation) = limiter.try_reserve(&mut state, id, now) {
            reserved.push(reservation);
        }
    }

    if reserved.len() < count {
        debug!(
            requested = count,
            reserved = reserved.len(),
            excluded = excluded.len(),
            "pool could not supply every requested credential"
        );
    }
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::time::Duration;

    fn pool(n: usize) -> Pool {
        let keys = (0..n).map(|i| format!("sk-{i}")).collect();
        Pool::new(keys, PoolConfig::default()).unwrap()
    }

    fn ids(reservations: &[Reservation]) -> Vec<usize> {
        reservations.iter().map(|r| r.credential.index()).collect()
    }

    #[test]
    fn unused_credentials_selected_in_id_order() {
        let pool = pool(4);
        let picked = select_eligible(&pool, 3, &HashSet::new(), Instant::now());
        assert_eq!(ids(&picked), vec![0, 1, 2]);
    }

    #[test]
    fn least_recently_used_goes_first() {
        let pool = pool(3);
        let t0 = Instant::now();
        select_eligible(&pool, 2, &HashSet::new(), t0);

        // key-2 has never been used, then key-0/key-1 tie on t0 and break by id
        let picked = select_eligible(&pool, 3, &HashSet::new(), t0 + Duration::from_secs(1));
        assert_eq!(ids(&picked), vec![2, 0, 1]);
    }

    #[test]
    fn excluded_credentials_are_skipped() {
        let pool = pool(3);
        let excluded = HashSet::from([CredentialId(0), CredentialId(2)]);
        let picked = select_eligible(&pool, 3, &excluded, Instant::now());
        assert_eq!(ids(&picked), vec![1]);
    }

    #[test]
    fn saturated_credentials_are_not_returned() {
        let pool = pool(2);
        let now = Instant::now();
        // Two passes use both minute slots of both credentials
        assert_eq!(select_eligible(&pool, 2, &HashSet::new(), now).len(), 2);
        assert_eq!(select_eligible(&pool, 2, &HashSet::new(), now).len(), 2);
        assert!(select_eligible(&pool, 2, &HashSet::new(), now).is_empty());

        let later = now + Duration::from_secs(60);
        assert_eq!(select_eligible(&pool, 2, &HashSet::new(), later).len(), 2);
    }

    #[test]
    fn zero_count_reserves_nothing() {
        let pool = pool(2);
        assert!(select_eligible(&pool, 0, &HashSet::new(), Instant::now()).is_empty());
        assert_eq!(pool.state_of(CredentialId(0)).minute_count, 0);
    }
}
