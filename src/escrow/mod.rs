//! Price-bet settlement contract.
//!
//! Holds wagers, records each bet against the oracle price at placement,
//! and after the betting window compares against a fresh oracle price,
//! paying 2× the stake on a win. Losses stay in the contract balance.
//!
//! Entry points are only reachable through `chain::Chain`, which moves
//! the attached value and rolls every effect back when a call fails.

pub mod chain;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::oracle::PriceOracle;
use crate::types::{Address, Bet, EscrowError, EscrowEvent, FeedId, Price, Wei};

pub use chain::{Chain, Ledger};

/// 0.001 ether.
pub const MIN_BET: Wei = 1_000_000_000_000_000;

/// Betting window in seconds.
pub const BET_DURATION: u64 = 300;

/// Maximum oracle price age accepted when a bet is placed.
pub const PLACEMENT_MAX_PRICE_AGE: u64 = 60;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    pub min_bet: Wei,
    pub bet_duration: u64,
    pub placement_max_price_age: u64,
}

impl Default for EscrowParams {
    fn default() -> Self {
        Self {
            min_bet: MIN_BET,
            bet_duration: BET_DURATION,
            placement_max_price_age: PLACEMENT_MAX_PRICE_AGE,
        }
    }
}

/// Caller, attached value and block time of the current transaction.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub caller: Address,
    pub value: Wei,
    pub now: u64,
}

/// Outcome of a successful `resolve_bet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub bet_id: u64,
    pub bettor: Address,
    pub won: bool,
    pub payout: Wei,
    pub target_price: u64,
    pub resolution_price: Price,
    pub fee_paid: Wei,
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    address: Address,
    feed_id: FeedId,
    params: EscrowParams,
    bets: Vec<Bet>,
    user_bets: HashMap<Address, Vec<u64>>,
    events: Vec<EscrowEvent>,
}

impl Escrow {
    pub fn new(address: Address, feed_id: FeedId, params: EscrowParams) -> Self {
        Self {
            address,
            feed_id,
            params,
            bets: Vec::new(),
            user_bets: HashMap::new(),
            events: Vec::new(),
        }
    }

    // -- Views -----------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn price_feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn params(&self) -> &EscrowParams {
        &self.params
    }

    /// Number of bets ever placed; also the id of the next bet.
    pub fn bet_counter(&self) -> u64 {
        self.bets.len() as u64
    }

    pub fn get_bet(&self, bet_id: u64) -> Result<Bet, EscrowError> {
        self.bet_ref(bet_id).cloned()
    }

    /// Bet ids owned by `user`, in placement order.
    pub fn get_user_bets(&self, user: &Address) -> Vec<u64> {
        self.user_bets.get(user).cloned().unwrap_or_default()
    }

    /// All bets with their ids.
    pub fn bets(&self) -> impl Iterator<Item = (u64, &Bet)> {
        self.bets.iter().enumerate().map(|(i, b)| (i as u64, b))
    }

    /// Ids of unresolved bets whose window has elapsed at `now`.
    pub fn matured_pending(&self, now: u64) -> Vec<u64> {
        self.bets()
            .filter(|(_, b)| !b.resolved && now >= b.resolvable_at(self.params.bet_duration))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    pub fn events_for_bet(&self, bet_id: u64) -> Vec<EscrowEvent> {
        self.events
            .iter()
            .filter(|e| e.bet_id() == bet_id)
            .cloned()
            .collect()
    }

    pub fn events_for_bettor(&self, bettor: &Address) -> Vec<EscrowEvent> {
        self.events
            .iter()
            .filter(|e| e.bettor() == *bettor)
            .cloned()
            .collect()
    }

    /// Oracle mantissa as the contract would record it right now.
    pub fn current_price<O: PriceOracle>(&self, oracle: &O, now: u64) -> Result<u64, EscrowError> {
        let price = oracle.price_no_older_than(&self.feed_id, self.params.placement_max_price_age, now)?;
        positive_mantissa(&price)
    }

    fn bet_ref(&self, bet_id: u64) -> Result<&Bet, EscrowError> {
        usize::try_from(bet_id)
            .ok()
            .and_then(|i| self.bets.get(i))
            .ok_or(EscrowError::BetNotFound(bet_id))
    }

    // -- Entry points ----------------------------------------------------

    /// Record a new bet. `call.value` is the stake and is already held by
    /// the contract.
    pub(crate) fn place_bet<O: PriceOracle>(
        &mut self,
        call: &CallContext,
        oracle: &O,
        prediction: bool,
    ) -> Result<u64, EscrowError> {
        if call.value < self.params.min_bet {
            return Err(EscrowError::InsufficientBet {
                amount: call.value,
                minimum: self.params.min_bet,
            });
        }

        let target_price = self.current_price(oracle, call.now)?;
        let bet_id = self.bet_counter();

        self.bets.push(Bet {
            bettor: call.caller,
            prediction,
            amount: call.value,
            timestamp: call.now,
            target_price,
            resolved: false,
            won: false,
        });
        self.user_bets.entry(call.caller).or_default().push(bet_id);
        self.events.push(EscrowEvent::BetPlaced {
            bet_id,
            bettor: call.caller,
            prediction,
            amount: call.value,
            target_price,
        });

        info!(
            bet_id,
            bettor = %call.caller,
            prediction,
            amount = %call.value,
            target_price,
            "Bet placed"
        );

        Ok(bet_id)
    }

    /// Settle a bet after its window. `call.value` pays the oracle update
    /// fee; anything above the fee is refunded.
    pub(crate) fn resolve_bet<O: PriceOracle>(
        &mut self,
        call: &CallContext,
        ledger: &mut Ledger,
        oracle: &mut O,
        bet_id: u64,
        update_data: &[Vec<u8>],
    ) -> Result<Resolution, EscrowError> {
        let bet = self.bet_ref(bet_id)?.clone();

        if bet.resolved {
            return Err(EscrowError::AlreadyResolved(bet_id));
        }
        let resolvable_at = bet.resolvable_at(self.params.bet_duration);
        if call.now < resolvable_at {
            return Err(EscrowError::TooEarly {
                bet_id,
                resolvable_at,
                now: call.now,
            });
        }

        let fee = oracle.update_fee(update_data);
        if call.value < fee {
            return Err(EscrowError::InsufficientFee {
                required: fee,
                provided: call.value,
            });
        }
        ledger.transfer(self.address, oracle.address(), fee)?;
        oracle.update_price_feeds(update_data, fee, call.now)?;

        let resolution_price =
            oracle.price_no_older_than(&self.feed_id, self.params.bet_duration, call.now)?;
        let current = positive_mantissa(&resolution_price)?;

        let won = (current > bet.target_price) == bet.prediction;
        let payout = if won {
            bet.winning_payout().ok_or(EscrowError::TransferFailed {
                to: bet.bettor,
                amount: Wei::MAX,
            })?
        } else {
            0
        };

        // Effects before interactions.
        if let Some(stored) = usize::try_from(bet_id).ok().and_then(|i| self.bets.get_mut(i)) {
            stored.resolved = true;
            stored.won = won;
        }
        self.events.push(EscrowEvent::BetResolved {
            bet_id,
            bettor: bet.bettor,
            won,
            payout,
        });

        let refund = call.value - fee;
        if refund > 0 {
            ledger
                .transfer(self.address, call.caller, refund)
                .map_err(|_| EscrowError::TransferFailed {
                    to: call.caller,
                    amount: refund,
                })?;
        }
        if payout > 0 {
            ledger
                .transfer(self.address, bet.bettor, payout)
                .map_err(|_| EscrowError::TransferFailed {
                    to: bet.bettor,
                    amount: payout,
                })?;
        }

        info!(
            bet_id,
            bettor = %bet.bettor,
            won,
            payout = %payout,
            target_price = bet.target_price,
            resolution_price = current,
            "Bet resolved"
        );

        Ok(Resolution {
            bet_id,
            bettor: bet.bettor,
            won,
            payout,
            target_price: bet.target_price,
            resolution_price,
            fee_paid: fee,
        })
    }
}

impl Escrow {
    /// Undo every effect recorded after the first `events_len` events.
    ///
    /// Each mutation emits its event together with its effects, so the
    /// event log doubles as the undo journal for a reverted call.
    pub(crate) fn revert_to(&mut self, events_len: usize) {
        while self.events.len() > events_len {
            match self.events.pop() {
                Some(EscrowEvent::BetPlaced { bet_id, bettor, .. }) => {
                    self.bets.truncate(usize::try_from(bet_id).unwrap_or(usize::MAX));
                    if let Some(ids) = self.user_bets.get_mut(&bettor) {
                        ids.retain(|id| *id != bet_id);
                        if ids.is_empty() {
                            self.user_bets.remove(&bettor);
                        }
                    }
                }
                Some(EscrowEvent::BetResolved { bet_id, .. }) => {
                    if let Some(bet) = usize::try_from(bet_id).ok().and_then(|i| self.bets.get_mut(i)) {
                        bet.resolved = false;
                        bet.won = false;
                    }
                }
                None => break,
            }
        }
    }
}

/// Oracle prices are signed; the contract only records positive mantissas.
fn positive_mantissa(price: &Price) -> Result<u64, EscrowError> {
    u64::try_from(price.price)
        .ok()
        .filter(|p| *p > 0)
        .ok_or(EscrowError::InvalidPrice(price.price))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
