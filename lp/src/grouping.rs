//! AccountGrouping - partition accounts into per-identity launch batches
//!
//! Batches are recomputed every scheduling round from the accounts' current
//! `done` state, so membership shifts as accounts complete.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{Account, Identity};

/// Accounts listing one identity id, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityGroup {
    pub id: String,
    pub accounts: Vec<String>,
}

/// One identity plus the accounts it launches this round
#[derive(Debug, Clone)]
pub struct LaunchBatch {
    pub identity: Arc<Identity>,
    pub accounts: Vec<String>,
}

impl LaunchBatch {
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Group accounts by every identity they list
///
/// Groups appear in first-seen order; an account is appended to each group it
/// names. Accounts without memberships appear nowhere.
pub fn split_by_identity(accounts: &[Account]) -> Vec<IdentityGroup> {
    debug!(accounts = accounts.len(), "split_by_identity: called");
    let mut groups: Vec<IdentityGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for account in accounts {
        for id in &account.identities {
            let slot = *index.entry(id.as_str()).or_insert_with(|| {
                groups.push(IdentityGroup {
                    id: id.clone(),
                    accounts: Vec::new(),
                });
                groups.len() - 1
            });
            let group = &mut groups[slot];
            if !group.accounts.contains(&account.name) {
                group.accounts.push(account.name.clone());
            }
        }
    }
    groups
}

/// Assign each not-done account to exactly one identity for this round
///
/// Accounts go to the known identity with the best [`Identity::priority`]
/// given how full each candidate batch already is; ties favour the earlier
/// membership. Accounts with no known identity top up the synthetic batch.
/// Every batch is capped at `per_batch` accounts.
pub fn accounts_by_identity(
    accounts: &[Account],
    identities: &[Arc<Identity>],
    synthetic: &Arc<Identity>,
    per_batch: usize,
    now: DateTime<Utc>,
) -> Vec<LaunchBatch> {
    debug!(accounts = accounts.len(), identities = identities.len(), per_batch, "accounts_by_identity: called");
    let mut known: HashMap<&str, &Arc<Identity>> = identities.iter().map(|i| (i.id(), i)).collect();
    known.insert(synthetic.id(), synthetic);

    let mut batches: Vec<LaunchBatch> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut leftover: Vec<&Account> = Vec::new();

    for account in accounts.iter().filter(|a| !a.done) {
        let mut best: Option<(&Arc<Identity>, i64)> = None;
        for id in &account.identities {
            let Some(identity) = known.get(id.as_str()) else {
                continue;
            };
            let fill = index.get(id).map_or(0, |&i| batches[i].len());
            let score = identity.priority(fill, per_batch, now);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((*identity, score));
            }
        }

        let Some((identity, score)) = best else {
            leftover.push(account);
            continue;
        };
        debug!(account = %account.name, identity = %identity.id(), score, "accounts_by_identity: assigned");
        let slot = *index.entry(identity.id().to_string()).or_insert_with(|| {
            batches.push(LaunchBatch {
                identity: (*identity).clone(),
                accounts: Vec::new(),
            });
            batches.len() - 1
        });
        batches[slot].accounts.push(account.name.clone());
    }

    for batch in &mut batches {
        batch.accounts.truncate(per_batch);
    }

    if !leftover.is_empty() {
        let slot = match index.get(synthetic.id()) {
            Some(&slot) => slot,
            None => {
                batches.push(LaunchBatch {
                    identity: synthetic.clone(),
                    accounts: Vec::new(),
                });
                batches.len() - 1
            }
        };
        let room = per_batch.saturating_sub(batches[slot].len());
        batches[slot]
            .accounts
            .extend(leftover.into_iter().take(room).map(|a| a.name.clone()));
        debug!(accounts = batches[slot].len(), "accounts_by_identity: synthetic batch topped up");
    }

    batches.retain(|b| !b.is_empty());
    batches
}

/// Earliest available first, then real identities, then fuller batches
pub fn order_batches(batches: &mut [LaunchBatch], now: DateTime<Utc>) {
    debug!(batches = batches.len(), "order_batches: called");
    batches.sort_by_cached_key(|b| (b.identity.available(now), b.identity.is_synthetic(), Reverse(b.len())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DelayPolicy;

    fn account(name: &str, ids: &[&str]) -> Account {
        Account::new(name).with_identities(ids.iter().copied())
    }

    fn names(group: &IdentityGroup) -> Vec<&str> {
        group.accounts.iter().map(String::as_str).collect()
    }

    fn identity(id: &str) -> Arc<Identity> {
        Arc::new(Identity::new(id, id, Arc::new(DelayPolicy::default())))
    }

    fn synthetic() -> Arc<Identity> {
        Arc::new(Identity::synthetic(Arc::new(DelayPolicy::default())))
    }

    // === split_by_identity ===

    #[test]
    fn test_one_account_one_identity() {
        let groups = split_by_identity(&[account("a1", &["v1"])]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "v1");
        assert_eq!(names(&groups[0]), vec!["a1"]);
    }

    #[test]
    fn test_two_accounts_same_identity() {
        let groups = split_by_identity(&[account("a1", &["v1"]), account("a2", &["v1"])]);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["a1", "a2"]);
    }

    #[test]
    fn test_two_accounts_different_identities() {
        let groups = split_by_identity(&[account("a1", &["v1"]), account("a2", &["v2"])]);
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["a1"]);
        assert_eq!(names(&groups[1]), vec!["a2"]);
    }

    #[test]
    fn test_two_accounts_sharing_two_identities() {
        let groups = split_by_identity(&[account("a1", &["v1", "v2"]), account("a2", &["v1", "v2"])]);
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["a1", "a2"]);
        assert_eq!(names(&groups[1]), vec!["a1", "a2"]);
    }

    #[test]
    fn test_six_accounts_fanned_out() {
        let accounts = [
            account("a1", &["v1"]),
            account("a2", &["v1"]),
            account("a3", &["v1"]),
            account("a4", &["v2"]),
            account("a5", &["v2"]),
            account("a6", &["v3"]),
        ];
        let groups = split_by_identity(&accounts);
        let sizes: Vec<usize> = groups.iter().map(|g| g.accounts.len()).collect();
        assert_eq!(sizes, vec![3, 2, 1]);
    }

    #[test]
    fn test_six_accounts_overlapping() {
        let accounts = [
            account("a1", &["v1", "v2"]),
            account("a2", &["v2", "v3"]),
            account("a3", &["v1", "v3"]),
            account("a4", &["v1", "v2"]),
            account("a5", &["v2", "v3"]),
            account("a6", &["v3", "v1"]),
        ];
        let groups = split_by_identity(&accounts);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].id, "v1");
        assert_eq!(names(&groups[0]), vec!["a1", "a3", "a4", "a6"]);
        assert_eq!(groups[1].id, "v2");
        assert_eq!(names(&groups[1]), vec!["a1", "a2", "a4", "a5"]);
        assert_eq!(groups[2].id, "v3");
        assert_eq!(names(&groups[2]), vec!["a2", "a3", "a5", "a6"]);
    }

    #[test]
    fn test_membership_less_accounts_are_nowhere() {
        let groups = split_by_identity(&[account("a1", &[]), account("a2", &["v1"])]);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["a2"]);
        assert!(split_by_identity(&[]).is_empty());
    }

    // === accounts_by_identity ===

    #[test]
    fn test_each_account_assigned_once() {
        let ids = [identity("v1"), identity("v2")];
        let accounts = [
            account("a1", &["v1", "v2"]),
            account("a2", &["v1", "v2"]),
            account("a3", &["v1", "v2"]),
            account("a4", &["v1", "v2"]),
        ];
        let batches = accounts_by_identity(&accounts, &ids, &synthetic(), 8, Utc::now());

        let mut all: Vec<&str> = batches.iter().flat_map(|b| b.accounts.iter().map(String::as_str)).collect();
        all.sort();
        assert_eq!(all, vec!["a1", "a2", "a3", "a4"]);
        // Fill penalizes the busier identity, so work spreads across both
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 2);
    }

    #[test]
    fn test_done_accounts_ignored() {
        let ids = [identity("v1")];
        let mut done = account("a1", &["v1"]);
        done.done = true;
        let accounts = [done, account("a2", &["v1"])];
        let batches = accounts_by_identity(&accounts, &ids, &synthetic(), 8, Utc::now());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].accounts, vec!["a2".to_string()]);
    }

    #[test]
    fn test_synthetic_topped_up_from_leftovers() {
        let ids = [identity("v1")];
        let accounts = [
            account("a1", &["v1"]),
            account("a2", &[]),
            account("a3", &["unknown"]),
            account("a4", &[]),
        ];
        let batches = accounts_by_identity(&accounts, &ids, &synthetic(), 2, Utc::now());
        let none = batches.iter().find(|b| b.identity.is_synthetic()).unwrap();
        assert_eq!(none.accounts, vec!["a2".to_string(), "a3".to_string()]);
    }

    #[test]
    fn test_synthetic_group_when_no_identities() {
        let accounts = [account("a1", &[]), account("a2", &[])];
        let batches = accounts_by_identity(&accounts, &[], &synthetic(), 8, Utc::now());
        assert_eq!(batches.len(), 1);
        assert!(batches[0].identity.is_synthetic());
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_batches_capped() {
        let ids = [identity("v1")];
        let accounts: Vec<Account> = (0..5).map(|n| account(&format!("a{}", n), &["v1"])).collect();
        let batches = accounts_by_identity(&accounts, &ids, &synthetic(), 3, Utc::now());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].accounts, vec!["a0", "a1", "a2"]);
    }

    #[test]
    fn test_nothing_to_do() {
        let mut a = account("a1", &["v1"]);
        a.done = true;
        assert!(accounts_by_identity(&[a], &[identity("v1")], &synthetic(), 8, Utc::now()).is_empty());
    }

    // === order_batches ===

    #[test]
    fn test_order_batches() {
        let now = Utc::now();
        let busy = identity("busy");
        busy.set_attempt(now);
        let small = identity("small");
        let large = identity("large");

        let mut batches = vec![
            LaunchBatch {
                identity: busy,
                accounts: vec!["b1".into(), "b2".into(), "b3".into()],
            },
            LaunchBatch {
                identity: synthetic(),
                accounts: vec!["n1".into(), "n2".into(), "n3".into()],
            },
            LaunchBatch {
                identity: small,
                accounts: vec!["s1".into()],
            },
            LaunchBatch {
                identity: large,
                accounts: vec!["l1".into(), "l2".into()],
            },
        ];
        order_batches(&mut batches, now);
        let order: Vec<&str> = batches.iter().map(|b| b.identity.id()).collect();
        assert_eq!(order, vec!["large", "small", "none", "busy"]);
    }
}
