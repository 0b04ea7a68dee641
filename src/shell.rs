//! Application shell state.
//!
//! Two tabs (chat and betting), a bet form, and a single notice line for
//! user-facing feedback. The shell holds no chain or network handles; it
//! turns user intent into `BetOrder`s and error values into text.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::betting::{BetLimits, BetOrder, OrderError};
use crate::types::{Address, ChatError, EscrowError};

/// Amount pre-filled in the bet form.
pub const DEFAULT_BET_AMOUNT: &str = "0.001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Chat,
    Bet,
}

impl Tab {
    /// Tab named by a URL fragment (`#chat`, `#bet`). Unknown fragments
    /// fall back to chat.
    pub fn from_fragment(fragment: &str) -> Tab {
        match fragment.trim_start_matches('#').to_ascii_lowercase().as_str() {
            "bet" => Tab::Bet,
            _ => Tab::Chat,
        }
    }

    pub fn fragment(&self) -> &'static str {
        match self {
            Tab::Chat => "#chat",
            Tab::Bet => "#bet",
        }
    }
}

// ---------------------------------------------------------------------------
// Bet form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetForm {
    pub amount: String,
    /// `None` until the user picks a direction.
    pub prediction: Option<bool>,
}

impl Default for BetForm {
    fn default() -> Self {
        Self {
            amount: DEFAULT_BET_AMOUNT.to_string(),
            prediction: None,
        }
    }
}

impl BetForm {
    pub fn validate(&self, limits: &BetLimits) -> Result<BetOrder, OrderError> {
        limits.order(self.prediction, &self.amount)
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            NoticeLevel::Info => write!(f, "{}", self.text),
            NoticeLevel::Error => write!(f, "⚠️ {}", self.text),
        }
    }
}

/// One user-facing sentence for any failure.
pub fn user_message(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<OrderError>() {
        return e.to_string();
    }
    if let Some(e) = err.downcast_ref::<EscrowError>() {
        return match e {
            EscrowError::TooEarly { .. } => "This bet can't be resolved yet. Try again after the 5-minute window.".into(),
            EscrowError::AlreadyResolved(_) => "This bet has already been resolved.".into(),
            EscrowError::OracleStale { .. } | EscrowError::PriceNotFound(_) => {
                "The price feed is out of date. Please try again in a moment.".into()
            }
            other => other.to_string(),
        };
    }
    if let Some(e) = err.downcast_ref::<ChatError>() {
        return e.to_string();
    }
    // Outermost context only; the chain below is for logs.
    err.to_string()
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    SelectTab(Tab),
    /// "Bet UP/DOWN" pressed from the chat view.
    QuickBet { prediction: bool },
    WalletConnected(Address),
    WalletDisconnected,
}

#[derive(Debug, Clone, Default)]
pub struct AppShell {
    pub tab: Tab,
    pub form: BetForm,
    pub wallet: Option<Address>,
    pub notice: Option<Notice>,
}

impl AppShell {
    pub fn new(initial_fragment: Option<&str>) -> Self {
        Self {
            tab: initial_fragment.map(Tab::from_fragment).unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::SelectTab(tab) => self.tab = tab,
            ShellEvent::QuickBet { prediction } => {
                self.tab = Tab::Bet;
                self.form.prediction = Some(prediction);
                self.notice = None;
            }
            ShellEvent::WalletConnected(address) => {
                self.wallet = Some(address);
                self.info(format!("Connected as {}", address.short()));
            }
            ShellEvent::WalletDisconnected => {
                self.wallet = None;
                self.form = BetForm::default();
                self.info("Wallet disconnected");
            }
        }
    }

    /// Validate the form for submission. On failure the reason is shown
    /// as the notice and `None` is returned.
    pub fn submit_bet(&mut self, limits: &BetLimits) -> Option<(Address, BetOrder)> {
        let Some(wallet) = self.wallet else {
            self.error("Connect your wallet to place a bet");
            return None;
        };
        match self.form.validate(limits) {
            Ok(order) => Some((wallet, order)),
            Err(e) => {
                self.error(e.to_string());
                None
            }
        }
    }

    pub fn bet_placed(&mut self, bet_id: u64) {
        self.form.prediction = None;
        self.info(format!("Bet #{bet_id} placed"));
    }

    pub fn report(&mut self, err: &anyhow::Error) {
        self.error(user_message(err));
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            level: NoticeLevel::Info,
            text: text.into(),
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            level: NoticeLevel::Error,
            text: text.into(),
        });
    }
}
