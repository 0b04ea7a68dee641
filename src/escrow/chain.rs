//! Host ledger.
//!
//! Account balances, block time, and the transaction boundary around the
//! escrow and oracle. Each entry point moves the attached value from the
//! caller to the target account, runs the contract logic, and restores the
//! pre-call state if anything fails.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::{CallContext, Escrow, Resolution};
use crate::oracle::PriceOracle;
use crate::types::{Address, Bet, EscrowError, FeedId, Wei};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    balances: HashMap<Address, Wei>,
    /// Accounts whose inbound transfers revert.
    #[serde(default)]
    rejecting: HashSet<Address>,
    /// Prior balances of accounts touched by the open transaction.
    #[serde(skip)]
    journal: Option<Vec<(Address, Option<Wei>)>>,
}

impl Ledger {
    pub fn balance_of(&self, account: &Address) -> Wei {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Create new funds (genesis allocation or a faucet).
    pub fn mint(&mut self, account: Address, amount: Wei) {
        let balance = self.balances.entry(account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn set_rejects_transfers(&mut self, account: Address, rejects: bool) {
        if rejects {
            self.rejecting.insert(account);
        } else {
            self.rejecting.remove(&account);
        }
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Wei) -> Result<(), EscrowError> {
        if amount == 0 {
            return Ok(());
        }
        if self.rejecting.contains(&to) {
            return Err(EscrowError::TransferFailed { to, amount });
        }

        let available = self.balance_of(&from);
        if available < amount {
            return Err(EscrowError::InsufficientFunds {
                account: from,
                available,
                needed: amount,
            });
        }

        self.set_balance(from, available - amount);
        let credited = self.balance_of(&to).saturating_add(amount);
        self.set_balance(to, credited);
        Ok(())
    }

    fn set_balance(&mut self, account: Address, amount: Wei) {
        let previous = self.balances.insert(account, amount);
        if let Some(journal) = self.journal.as_mut() {
            journal.push((account, previous));
        }
    }

    /// Start recording balance changes so they can be undone.
    fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    fn commit(&mut self) {
        self.journal = None;
    }

    /// Restore every balance changed since `begin`, newest first.
    fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (account, previous) in journal.into_iter().rev() {
            match previous {
                Some(balance) => self.balances.insert(account, balance),
                None => self.balances.remove(&account),
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// The escrow and its oracle running on a single-writer ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain<O> {
    ledger: Ledger,
    escrow: Escrow,
    oracle: O,
    block_time: u64,
}

impl<O: PriceOracle> Chain<O> {
    pub fn new(escrow: Escrow, oracle: O, block_time: u64) -> Self {
        Self {
            ledger: Ledger::default(),
            escrow,
            oracle,
            block_time,
        }
    }

    // -- Environment -----------------------------------------------------

    pub fn block_time(&self) -> u64 {
        self.block_time
    }

    /// Move the clock forward. Block time never goes backwards.
    pub fn set_block_time(&mut self, time: u64) {
        self.block_time = self.block_time.max(time);
    }

    pub fn advance_time(&mut self, secs: u64) {
        self.block_time = self.block_time.saturating_add(secs);
    }

    pub fn mint(&mut self, account: Address, amount: Wei) {
        self.ledger.mint(account, amount);
    }

    pub fn set_rejects_transfers(&mut self, account: Address, rejects: bool) {
        self.ledger.set_rejects_transfers(account, rejects);
    }

    pub fn balance_of(&self, account: &Address) -> Wei {
        self.ledger.balance_of(account)
    }

    pub fn contract_balance(&self) -> Wei {
        self.ledger.balance_of(&self.escrow.address())
    }

    pub fn escrow(&self) -> &Escrow {
        &self.escrow
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    // -- Views -----------------------------------------------------------

    pub fn get_bet(&self, bet_id: u64) -> Result<Bet, EscrowError> {
        self.escrow.get_bet(bet_id)
    }

    pub fn get_user_bets(&self, user: &Address) -> Vec<u64> {
        self.escrow.get_user_bets(user)
    }

    pub fn bet_counter(&self) -> u64 {
        self.escrow.bet_counter()
    }

    pub fn price_feed_id(&self) -> FeedId {
        self.escrow.price_feed_id()
    }

    pub fn current_price(&self) -> Result<u64, EscrowError> {
        self.escrow.current_price(&self.oracle, self.block_time)
    }

    // -- Transactions ----------------------------------------------------

    /// `placeBet(prediction)` with `value` as the stake.
    pub fn place_bet(&mut self, caller: Address, value: Wei, prediction: bool) -> Result<u64, EscrowError> {
        let target = self.escrow.address();
        self.transact("place_bet", caller, value, target, |escrow, _ledger, oracle, call| {
            escrow.place_bet(call, oracle, prediction)
        })
    }

    /// `resolveBet(betId, updateData)` with `value` covering the oracle fee.
    pub fn resolve_bet(
        &mut self,
        caller: Address,
        value: Wei,
        bet_id: u64,
        update_data: &[Vec<u8>],
    ) -> Result<Resolution, EscrowError> {
        let target = self.escrow.address();
        self.transact("resolve_bet", caller, value, target, |escrow, ledger, oracle, call| {
            escrow.resolve_bet(call, ledger, oracle, bet_id, update_data)
        })
    }

    /// Plain transfer into the contract (house funding).
    pub fn fund(&mut self, caller: Address, value: Wei) -> Result<(), EscrowError> {
        let target = self.escrow.address();
        self.transact("fund", caller, value, target, |_, _, _, _| Ok(()))
    }

    /// Push a price update straight to the oracle. Value above the fee is
    /// returned to the caller.
    pub fn update_price_feeds(
        &mut self,
        caller: Address,
        value: Wei,
        update_data: &[Vec<u8>],
    ) -> Result<(), EscrowError> {
        let target = self.oracle.address();
        self.transact("update_price_feeds", caller, value, target, |_, ledger, oracle, call| {
            let fee = oracle.update_fee(update_data);
            if call.value < fee {
                return Err(EscrowError::InsufficientFee {
                    required: fee,
                    provided: call.value,
                });
            }
            oracle.update_price_feeds(update_data, fee, call.now)?;
            ledger.transfer(oracle.address(), call.caller, call.value - fee)
        })
    }

    fn transact<T>(
        &mut self,
        entry_point: &'static str,
        caller: Address,
        value: Wei,
        target: Address,
        body: impl FnOnce(&mut Escrow, &mut Ledger, &mut O, &CallContext) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        // Oracle state is one slot per feed. Ledger and escrow keep undo journals.
        let oracle_snapshot = self.oracle.clone();
        let events_mark = self.escrow.events().len();
        self.ledger.begin();
        let call = CallContext {
            caller,
            value,
            now: self.block_time,
        };

        let result = match self.ledger.transfer(caller, target, value) {
            Ok(()) => body(&mut self.escrow, &mut self.ledger, &mut self.oracle, &call),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                self.ledger.commit();
                debug!(entry_point, caller = %caller, value = %value, "Transaction committed");
            }
            Err(e) => {
                warn!(entry_point, caller = %caller, value = %value, error = %e, "Transaction reverted");
                self.ledger.rollback();
                self.escrow.revert_to(events_mark);
                self.oracle = oracle_snapshot;
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
