//! Personal finance assistant: an income/expense ledger per owner

use super::{format_amount, DomainProfile};
use crate::error::EngineError;
use crate::prompt::Persona;
use crate::tools::{
    ensure_object, optional_limit, optional_str, require_number, require_str, Tool, ToolContext,
    ToolRegistry,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

const PERSONA: &str = "Help the user track income and expenses and understand their balance. \
Record an entry only when the user clearly states an amount. Ask for the amount or category when it is missing. \
Keep answers short and use the currency the user uses.";

const KNOWLEDGE: &str = "Expense categories: food, transport, housing, utilities, health, entertainment, shopping, education, other.\n\
Income sources: salary, freelance, gift, refund, investment, other.\n\
Balance = total income - total expenses.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub kind: EntryKind,
    pub amount: f64,
    /// Expense category or income source
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Balance {
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
}

/// Ledger entries partitioned by owner id
#[derive(Default)]
pub struct LedgerBook {
    entries: RwLock<HashMap<String, Vec<LedgerEntry>>>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, owner_id: &str, entry: LedgerEntry) {
        let mut entries = self.entries.write().await;
        entries.entry(owner_id.to_string()).or_default().push(entry);
    }

    /// Newest first
    pub async fn entries(&self, owner_id: &str) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;
        let mut list = entries.get(owner_id).cloned().unwrap_or_default();
        list.reverse();
        list
    }

    pub async fn balance(&self, owner_id: &str) -> Balance {
        let entries = self.entries.read().await;
        let (income, expenses) = entries
            .get(owner_id)
            .map(|list| {
                list.iter().fold((0.0, 0.0), |(inc, exp), e| match e.kind {
                    EntryKind::Income => (inc + e.amount, exp),
                    EntryKind::Expense => (inc, exp + e.amount),
                })
            })
            .unwrap_or((0.0, 0.0));

        Balance {
            income,
            expenses,
            balance: income - expenses,
        }
    }
}

pub fn profile() -> DomainProfile {
    let book = Arc::new(LedgerBook::new());
    let registry = ToolRegistry::new()
        .with(Arc::new(AddExpenseTool { book: book.clone() }))
        .with(Arc::new(AddIncomeTool { book: book.clone() }))
        .with(Arc::new(GetBalanceTool { book: book.clone() }))
        .with(Arc::new(ListTransactionsTool { book }));

    DomainProfile {
        kind: "finance".to_string(),
        persona: Persona::new("Penny, a personal finance assistant", PERSONA),
        domain_knowledge: KNOWLEDGE.to_string(),
        registry,
        collection: Some("finance_knowledge".to_string()),
    }
}

fn positive_amount(args: &Value) -> Result<f64> {
    let amount = require_number(args, "amount")?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(EngineError::InvalidToolInput(
            "'amount' must be a positive number".to_string(),
        ));
    }
    Ok(amount)
}

async fn record_entry(
    book: &LedgerBook,
    ctx: &ToolContext,
    args: &Value,
    kind: EntryKind,
    category_key: &str,
) -> Result<Value> {
    ensure_object(args)?;
    let amount = positive_amount(args)?;
    let category = require_str(args, category_key)?.to_lowercase();
    let description = optional_str(args, "description").map(str::to_string);

    book.record(
        &ctx.owner_id,
        LedgerEntry {
            id: Uuid::new_v4(),
            kind,
            amount,
            category: category.clone(),
            description,
            recorded_at: Utc::now(),
        },
    )
    .await;

    let balance = book.balance(&ctx.owner_id).await;
    info!(owner_id = %ctx.owner_id, ?kind, amount, "Ledger entry recorded");

    let label = match kind {
        EntryKind::Income => "income",
        EntryKind::Expense => "expense",
    };
    Ok(json!(format!(
        "Recorded {} of {} ({}). Balance: {}",
        label,
        format_amount(amount),
        category,
        format_amount(balance.balance)
    )))
}

pub struct AddExpenseTool {
    book: Arc<LedgerBook>,
}

#[async_trait::async_trait]
impl Tool for AddExpenseTool {
    fn name(&self) -> &'static str {
        "addExpense"
    }

    fn description(&self) -> &'static str {
        "Record an expense in the user's ledger"
    }

    fn usage(&self) -> &'static str {
        r#"{"amount": 12.5, "category": "food", "description": "lunch"}"#
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value> {
        record_entry(&self.book, ctx, args, EntryKind::Expense, "category").await
    }
}

pub struct AddIncomeTool {
    book: Arc<LedgerBook>,
}

#[async_trait::async_trait]
impl Tool for AddIncomeTool {
    fn name(&self) -> &'static str {
        "addIncome"
    }

    fn description(&self) -> &'static str {
        "Record income in the user's ledger"
    }

    fn usage(&self) -> &'static str {
        r#"{"amount": 2500, "source": "salary", "description": "March pay"}"#
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value> {
        record_entry(&self.book, ctx, args, EntryKind::Income, "source").await
    }
}

pub struct GetBalanceTool {
    book: Arc<LedgerBook>,
}

#[async_trait::async_trait]
impl Tool for GetBalanceTool {
    fn name(&self) -> &'static str {
        "getBalance"
    }

    fn description(&self) -> &'static str {
        "Summarize the user's current balance"
    }

    fn usage(&self) -> &'static str {
        "{}"
    }

    async fn execute(&self, ctx: &ToolContext, _args: &Value) -> Result<Value> {
        let balance = self.book.balance(&ctx.owner_id).await;
        Ok(json!(format!("Balance: {}", format_amount(balance.balance))))
    }
}

pub struct ListTransactionsTool {
    book: Arc<LedgerBook>,
}

#[async_trait::async_trait]
impl Tool for ListTransactionsTool {
    fn name(&self) -> &'static str {
        "listTransactions"
    }

    fn description(&self) -> &'static str {
        "List the user's most recent ledger entries, optionally only income or only expenses"
    }

    fn usage(&self) -> &'static str {
        r#"{"limit": 10, "kind": "expense"}"#
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<Value> {
        ensure_object(args)?;
        let limit = optional_limit(args, 10, 50)?;
        let kind = match optional_str(args, "kind").map(str::to_lowercase).as_deref() {
            None => None,
            Some("income") => Some(EntryKind::Income),
            Some("expense") | Some("expenses") => Some(EntryKind::Expense),
            Some(other) => {
                return Err(EngineError::InvalidToolInput(format!(
                    "'kind' must be 'income' or 'expense', got '{}'",
                    other
                )))
            }
        };

        let transactions: Vec<LedgerEntry> = self
            .book
            .entries(&ctx.owner_id)
            .await
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .collect();

        Ok(json!({
            "count": transactions.len(),
            "transactions": transactions,
        }))
    }
}
