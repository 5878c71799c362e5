//! Online representative tracking and quorum computation.
//!
//! Voting weight observed from live representatives decays after a cutoff;
//! periodic samples of the online total go to the `online_weight` table and
//! their median forms the trended weight, which backstops quorum while the
//! node warms up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ledger::Ledger;
use crate::store::Writer;
use crate::types::Amount;
use crate::Account;

/// How long an observed representative counts as online.
const ONLINE_WEIGHT_CUTOFF: Duration = Duration::from_secs(5 * 60);

struct OnlineRepsInner {
    reps: HashMap<Account, Instant>,
    trended: Amount,
}

/// Tracks which representatives are online and answers the quorum delta.
pub struct OnlineReps {
    ledger: Arc<Ledger>,
    /// Floor on the weight used for quorum computation
    minimum: Amount,
    quorum_percent: u8,
    inner: Mutex<OnlineRepsInner>,
}

impl OnlineReps {
    pub fn new(ledger: Arc<Ledger>, minimum: Amount, quorum_percent: u8) -> Self {
        // Seed the trend from stored samples so quorum is meaningful
        // before the first observation
        let trended = {
            let tx = ledger.store.tx_begin_read();
            let mut samples: Vec<Amount> =
                ledger.store.online_weight.iter(&tx).map(|(_, w)| w).collect();
            samples.sort_unstable();
            if samples.is_empty() {
                0
            } else {
                samples[samples.len() / 2]
            }
        };
        OnlineReps {
            ledger,
            minimum,
            quorum_percent,
            inner: Mutex::new(OnlineRepsInner {
                reps: HashMap::new(),
                trended,
            }),
        }
    }

    /// Record a representative as online.
    pub fn observe(&self, representative: &Account) {
        if self.ledger.weight(representative) == 0 {
            return;
        }
        let mut inner = self.inner.lock().expect("online reps lock poisoned");
        inner.reps.insert(*representative, Instant::now());
    }

    /// Sum of weights of representatives seen within the cutoff.
    pub fn online(&self) -> Amount {
        let mut inner = self.inner.lock().expect("online reps lock poisoned");
        let now = Instant::now();
        inner
            .reps
            .retain(|_, seen| now.duration_since(*seen) < ONLINE_WEIGHT_CUTOFF);
        inner
            .reps
            .keys()
            .map(|rep| self.ledger.weight(rep))
            .sum()
    }

    pub fn trended(&self) -> Amount {
        self.inner.lock().expect("online reps lock poisoned").trended
    }

    /// Weight base for quorum: the largest of online, trended and the
    /// configured minimum.
    pub fn quorum_base(&self) -> Amount {
        self.online().max(self.trended()).max(self.minimum)
    }

    /// Weight required for quorum.
    pub fn delta(&self) -> Amount {
        // Divide first: the base can be near the amount ceiling
        (self.quorum_base() / 100) * self.quorum_percent as Amount
    }

    /// Store an online-weight sample, trim old ones, refresh the trend.
    pub fn sample(&self) {
        let online = self.online();
        let tx = self.ledger.store.tx_begin_write(Writer::OnlineWeight);
        self.ledger
            .store
            .online_weight
            .put(&tx, crate::seconds_since_epoch(), online);
        self.ledger
            .store
            .online_weight
            .trim(&tx, crate::constants::ONLINE_WEIGHT_SAMPLES_MAX);
        let mut samples: Vec<Amount> = self
            .ledger
            .store
            .online_weight
            .iter(&tx)
            .map(|(_, weight)| weight)
            .collect();
        tx.commit();
        samples.sort_unstable();
        if !samples.is_empty() {
            let mut inner = self.inner.lock().expect("online reps lock poisoned");
            inner.trended = samples[samples.len() / 2];
        }
    }

    pub fn representative_count(&self) -> usize {
        self.inner
            .lock()
            .expect("online reps lock poisoned")
            .reps
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{LedgerConstants, DEV_GENESIS_KEY};
    use crate::stats::Stats;
    use crate::store::Store;

    fn test_ledger() -> Arc<Ledger> {
        let store = Arc::new(Store::open_temporary().expect("temporary store"));
        Arc::new(Ledger::new(
            store,
            LedgerConstants::dev(),
            Arc::new(Stats::new()),
        ))
    }

    #[test]
    fn observe_counts_weighted_reps() {
        let ledger = test_ledger();
        let reps = OnlineReps::new(ledger.clone(), 0, 67);
        assert_eq!(reps.online(), 0);
        // Genesis holds the entire supply
        reps.observe(&DEV_GENESIS_KEY.public());
        assert_eq!(reps.online(), crate::constants::GENESIS_AMOUNT);
        // Weightless accounts are ignored
        reps.observe(&[9u8; 32]);
        assert_eq!(reps.representative_count(), 1);
    }

    #[test]
    fn delta_is_quorum_fraction() {
        let ledger = test_ledger();
        let reps = OnlineReps::new(ledger, 1000, 67);
        // No reps online: minimum applies
        assert_eq!(reps.delta(), (1000 / 100) * 67);
    }

    #[test]
    fn sample_persists_and_trends() {
        let ledger = test_ledger();
        let reps = OnlineReps::new(ledger.clone(), 0, 67);
        reps.observe(&DEV_GENESIS_KEY.public());
        reps.sample();
        let tx = ledger.store.tx_begin_read();
        assert_eq!(ledger.store.online_weight.count(&tx), 1);
        assert_eq!(reps.trended(), crate::constants::GENESIS_AMOUNT);
    }
}
