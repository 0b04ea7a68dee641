//! Bet lifecycle through the betting service: placement, the five-minute
//! window, oracle-priced resolution and the keeper's auto-resolve pass.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};

use wagerchat::engine::betting::{BetLimits, BetOrder, BettingService};
use wagerchat::engine::keeper::{Keeper, KeeperConfig};
use wagerchat::escrow::{Chain, Escrow, EscrowParams, BET_DURATION, MIN_BET};
use wagerchat::oracle::LocalPriceFeed;
use wagerchat::shell::{user_message, AppShell, ShellEvent};
use wagerchat::types::{parse_ether, Address, BetStatus, EscrowError, FeedId, Wei, ETH_USD_FEED, WEI_PER_ETHER};

use crate::mock_price_source::ScriptedSource;

const START: u64 = 1_760_000_000;
const FEE: Wei = 1;
const HOUSE: Address = Address::from_bytes([0x11; 20]);
const ALICE: Address = Address::from_bytes([0x01; 20]);
const BOB: Address = Address::from_bytes([0x02; 20]);
const KEEPER: Address = Address::from_bytes([0x0e; 20]);

/// $2000.00 and $2050.00 with 8 decimals.
const P2000: i64 = 200_000_000_000;
const P2050: i64 = 205_000_000_000;

fn setup() -> (Arc<BettingService<LocalPriceFeed>>, ScriptedSource) {
    let feed: FeedId = ETH_USD_FEED.parse().unwrap();
    let oracle = LocalPriceFeed::new(Address::from_bytes([0xaa; 20]), FEE, [feed]);
    let escrow = Escrow::new(Address::from_bytes([0xcc; 20]), feed, EscrowParams::default());
    let mut chain = Chain::new(escrow, oracle, START);
    for account in [HOUSE, ALICE, BOB, KEEPER] {
        chain.mint(account, WEI_PER_ETHER);
    }
    chain.fund(HOUSE, WEI_PER_ETHER).unwrap();

    let source = ScriptedSource::at(P2000, START);
    let service = BettingService::new(
        Arc::new(Mutex::new(chain)),
        Arc::new(source.clone()),
        BetLimits::default(),
    );
    (Arc::new(service), source)
}

async fn advance(service: &BettingService<LocalPriceFeed>, secs: u64) {
    service.chain().lock().await.advance_time(secs);
}

async fn balance(service: &BettingService<LocalPriceFeed>, account: Address) -> Wei {
    service.chain().lock().await.balance_of(&account)
}

async fn contract_balance(service: &BettingService<LocalPriceFeed>) -> Wei {
    service.chain().lock().await.contract_balance()
}

fn order(prediction: bool, eth: &str) -> BetOrder {
    BetOrder {
        prediction,
        amount: parse_ether(eth).unwrap(),
    }
}

#[tokio::test]
async fn test_winning_up_bet_pays_double() {
    let (service, source) = setup();

    let bet_id = assert_ok!(service.place_bet(ALICE, &order(true, "0.001")).await);
    assert_eq!(bet_id, 0);
    let bet = service.chain().lock().await.get_bet(0).unwrap();
    assert_eq!(bet.target_price, P2000 as u64);
    assert_eq!(contract_balance(&service).await, WEI_PER_ETHER + MIN_BET);

    advance(&service, BET_DURATION).await;
    source.set(P2050, START + BET_DURATION);
    let keeper_before = balance(&service, KEEPER).await;

    let resolution = assert_ok!(service.resolve_bet(KEEPER, bet_id).await);
    assert!(resolution.won);
    assert_eq!(resolution.payout, parse_ether("0.002").unwrap());
    assert_eq!(resolution.fee_paid, FEE);

    assert_eq!(contract_balance(&service).await, WEI_PER_ETHER + MIN_BET - 2 * MIN_BET);
    // Placement refreshed the oracle at Alice's expense.
    assert_eq!(balance(&service, ALICE).await, WEI_PER_ETHER - FEE - MIN_BET + 2 * MIN_BET);
    assert_eq!(balance(&service, KEEPER).await, keeper_before - FEE);

    let views = service.bets_for(&ALICE).await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, BetStatus::Won);
    assert!(!views[0].claimable);
}

#[tokio::test]
async fn test_down_bet_on_rising_price_loses() {
    let (service, source) = setup();
    let bet_id = assert_ok!(service.place_bet(BOB, &order(false, "0.01")).await);

    advance(&service, BET_DURATION).await;
    source.set(P2050, START + BET_DURATION);

    let resolution = assert_ok!(service.resolve_bet(KEEPER, bet_id).await);
    assert!(!resolution.won);
    assert_eq!(resolution.payout, 0);
    // Stake stays with the house.
    assert_eq!(contract_balance(&service).await, WEI_PER_ETHER + parse_ether("0.01").unwrap());
    assert_eq!(service.bets_for(&BOB).await[0].status, BetStatus::Lost);
}

#[tokio::test]
async fn test_unchanged_price_loses_an_up_bet() {
    let (service, source) = setup();
    let bet_id = assert_ok!(service.place_bet(ALICE, &order(true, "0.001")).await);

    advance(&service, BET_DURATION).await;
    source.set(P2000, START + BET_DURATION);

    let resolution = assert_ok!(service.resolve_bet(KEEPER, bet_id).await);
    assert!(!resolution.won);
}

#[tokio::test]
async fn test_second_resolution_is_rejected_without_side_effects() {
    let (service, source) = setup();
    let bet_id = assert_ok!(service.place_bet(ALICE, &order(true, "0.001")).await);
    advance(&service, BET_DURATION).await;
    source.set(P2050, START + BET_DURATION);
    assert_ok!(service.resolve_bet(KEEPER, bet_id).await);

    let contract_before = contract_balance(&service).await;
    let keeper_before = balance(&service, KEEPER).await;
    let events_before = service.chain().lock().await.escrow().events().len();

    let err = assert_err!(service.resolve_bet(KEEPER, bet_id).await);
    assert_eq!(err.downcast_ref::<EscrowError>(), Some(&EscrowError::AlreadyResolved(bet_id)));
    assert_eq!(user_message(&err), "This bet has already been resolved.");

    assert_eq!(contract_balance(&service).await, contract_before);
    assert_eq!(balance(&service, KEEPER).await, keeper_before);
    assert_eq!(service.chain().lock().await.escrow().events().len(), events_before);
}

#[tokio::test]
async fn test_resolution_inside_window_is_too_early() {
    let (service, source) = setup();
    let bet_id = assert_ok!(service.place_bet(ALICE, &order(true, "0.001")).await);
    advance(&service, BET_DURATION - 1).await;
    source.set(P2050, START + BET_DURATION - 1);

    let err = assert_err!(service.resolve_bet(KEEPER, bet_id).await);
    assert!(matches!(err.downcast_ref::<EscrowError>(), Some(EscrowError::TooEarly { .. })));
    assert!(!service.chain().lock().await.get_bet(bet_id).unwrap().resolved);
}

#[tokio::test]
async fn test_placement_with_stale_price_and_offline_source_fails() {
    let (service, source) = setup();
    // Prime the oracle, then let it go stale with the push service down.
    assert_ok!(service.refresh_price(KEEPER).await);
    source.go_offline();
    advance(&service, 61).await;

    let err = assert_err!(service.place_bet(ALICE, &order(true, "0.001")).await);
    assert!(matches!(err.downcast_ref::<EscrowError>(), Some(EscrowError::OracleStale { .. })));
    assert_eq!(service.chain().lock().await.bet_counter(), 0);
    assert_eq!(balance(&service, ALICE).await, WEI_PER_ETHER);
}

#[tokio::test]
async fn test_keeper_settles_matured_bets() {
    let (service, source) = setup();
    assert_ok!(service.place_bet(ALICE, &order(true, "0.001")).await);
    assert_ok!(service.place_bet(BOB, &order(false, "0.001")).await);

    let mut keeper = Keeper::new(
        service.clone(),
        KeeperConfig {
            account: KEEPER,
            auto_resolve: true,
        },
    );

    let early = keeper.tick().await;
    assert!(early.is_clean());
    assert!(early.resolution.resolved.is_empty());

    advance(&service, BET_DURATION).await;
    source.set(P2050, START + BET_DURATION);

    let report = keeper.tick().await;
    assert!(report.is_clean());
    assert_eq!(report.resolution.resolved.len(), 2);
    assert_eq!(report.resolution.total_paid(), 2 * MIN_BET);
    assert_eq!(keeper.ticks(), 2);
    assert!(service.matured_pending().await.is_empty());
}

#[tokio::test]
async fn test_shell_bet_flow() {
    let (service, _source) = setup();
    let mut shell = AppShell::new(Some("#chat"));
    shell.apply(ShellEvent::WalletConnected(ALICE));
    shell.apply(ShellEvent::QuickBet { prediction: true });

    let (bettor, order) = shell.submit_bet(&service.limits()).unwrap();
    let bet_id = assert_ok!(service.place_bet(bettor, &order).await);
    shell.bet_placed(bet_id);

    assert_eq!(shell.notice.as_ref().unwrap().to_string(), "Bet #0 placed");
    assert_eq!(shell.form.prediction, None);

    // Bet too large for the form limits never reaches the chain.
    shell.form.prediction = Some(false);
    shell.form.amount = "2".into();
    assert!(shell.submit_bet(&service.limits()).is_none());
    assert!(shell.notice.as_ref().unwrap().to_string().starts_with("⚠️ "));
    assert_eq!(service.chain().lock().await.bet_counter(), 1);
}
