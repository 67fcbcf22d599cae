/// # Bank Account Demo
///
/// A single aggregate with three command types sharing one router, showing
/// the dispatch pipeline end to end against the in-memory reference store.
///
/// ## Usage
///
/// ```sh
/// cargo run --example bank_account
/// ```
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cqrs_runtime_core::aggregate::{Aggregate, CommandHandler};
use cqrs_runtime_core::command::Command;
use cqrs_runtime_core::dispatcher::RouterBuilder;
use cqrs_runtime_core::error::{CqrsError, Result};
use cqrs_runtime_core::event::DomainEvent;
use cqrs_runtime_core::registry::AggregateRegistry;
use cqrs_runtime_core::store::memory::InMemoryEventStore;

#[derive(Clone, Debug, Serialize, Deserialize)]
enum BankAccountEvent {
    Opened { owner: String },
    Deposited { amount: u64 },
    Withdrawn { amount: u64 },
}

impl DomainEvent for BankAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BankAccountEvent::Opened { .. } => "bank_account.opened",
            BankAccountEvent::Deposited { .. } => "bank_account.deposited",
            BankAccountEvent::Withdrawn { .. } => "bank_account.withdrawn",
        }
    }
}

#[derive(Clone, Debug, Default)]
struct BankAccount {
    owner: String,
    balance: i64,
}

impl Aggregate for BankAccount {
    type Event = BankAccountEvent;

    fn new(_uuid: Uuid) -> Self {
        Self::default()
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BankAccountEvent::Opened { owner } => self.owner = owner.clone(),
            BankAccountEvent::Deposited { amount } => self.balance += *amount as i64,
            BankAccountEvent::Withdrawn { amount } => self.balance -= *amount as i64,
        }
    }
}

#[derive(Clone, Debug)]
struct OpenAccount {
    account_id: Uuid,
    owner: String,
}

impl Command for OpenAccount {
    fn command_type(&self) -> &'static str {
        "bank_account.open"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.account_id)
    }
}

#[derive(Clone, Debug)]
struct DepositFunds {
    account_id: Uuid,
    amount: u64,
}

impl Command for DepositFunds {
    fn command_type(&self) -> &'static str {
        "bank_account.deposit"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.account_id)
    }
}

#[derive(Clone, Debug)]
struct WithdrawFunds {
    account_id: Uuid,
    amount: u64,
}

impl Command for WithdrawFunds {
    fn command_type(&self) -> &'static str {
        "bank_account.withdraw"
    }

    fn aggregate_id(&self) -> Option<Uuid> {
        Some(self.account_id)
    }
}

struct BankAccountHandler;

#[async_trait]
impl CommandHandler<BankAccount, OpenAccount> for BankAccountHandler {
    async fn handle(&self, _state: &BankAccount, command: &OpenAccount) -> Result<Vec<BankAccountEvent>> {
        Ok(vec![BankAccountEvent::Opened {
            owner: command.owner.clone(),
        }])
    }
}

#[async_trait]
impl CommandHandler<BankAccount, DepositFunds> for BankAccountHandler {
    async fn handle(&self, _state: &BankAccount, command: &DepositFunds) -> Result<Vec<BankAccountEvent>> {
        Ok(vec![BankAccountEvent::Deposited {
            amount: command.amount,
        }])
    }
}

#[async_trait]
impl CommandHandler<BankAccount, WithdrawFunds> for BankAccountHandler {
    async fn handle(&self, state: &BankAccount, command: &WithdrawFunds) -> Result<Vec<BankAccountEvent>> {
        if state.balance < command.amount as i64 {
            return Err(CqrsError::DomainError(format!(
                "insufficient funds: balance {} < withdrawal {}",
                state.balance, command.amount
            )));
        }
        Ok(vec![BankAccountEvent::Withdrawn {
            amount: command.amount,
        }])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(InMemoryEventStore::new());
    let registry = AggregateRegistry::<BankAccount, InMemoryEventStore>::new(store.clone());

    let router = RouterBuilder::new()
        .route::<BankAccount, OpenAccount, InMemoryEventStore>(
            "bank_account.open",
            registry.clone(),
            BankAccountHandler,
            Duration::from_secs(1),
        )
        .route::<BankAccount, DepositFunds, InMemoryEventStore>(
            "bank_account.deposit",
            registry.clone(),
            BankAccountHandler,
            Duration::from_secs(1),
        )
        .route::<BankAccount, WithdrawFunds, InMemoryEventStore>(
            "bank_account.withdraw",
            registry.clone(),
            BankAccountHandler,
            Duration::from_secs(1),
        )
        .build();

    let account_id = Uuid::new_v4();

    router
        .dispatch(
            &OpenAccount {
                account_id,
                owner: "ada".to_string(),
            },
            None,
        )
        .await?;
    router
        .dispatch(
            &DepositFunds {
                account_id,
                amount: 100,
            },
            None,
        )
        .await?;

    let overdraft = router
        .dispatch(
            &WithdrawFunds {
                account_id,
                amount: 500,
            },
            None,
        )
        .await;
    assert!(matches!(overdraft, Err(CqrsError::DomainError(_))));

    router
        .dispatch(
            &WithdrawFunds {
                account_id,
                amount: 40,
            },
            None,
        )
        .await?;

    println!("account {account_id} opened, deposited 100, withdrew 40, rejected an overdraft");
    Ok(())
}
