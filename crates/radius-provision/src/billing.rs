//! Wallet and invoice ledger boundary
//!
//! The ledger owns money. The coordinator only asks it to apply payments and
//! to issue compensating credit notes when a service is terminated early.

use crate::service::{CustomerId, ServiceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be positive: {0}")]
    InvalidAmount(Decimal),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Part of a payment settled against one invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceApplication {
    pub invoice_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub applications: Vec<InvoiceApplication>,
    /// Portion left after every open invoice was settled
    pub overpayment: Decimal,
    /// Wallet balance after the payment
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditNoteRequest {
    pub customer_id: CustomerId,
    pub service_id: ServiceId,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: i64,
    pub number: String,
    pub customer_id: CustomerId,
    pub service_id: ServiceId,
    pub amount: Decimal,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
}

#[async_trait]
pub trait BillingLedger: Send + Sync {
    /// Settle open invoices oldest first and credit any remainder to the wallet
    async fn apply_payment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentApplication, LedgerError>;

    async fn issue_credit_note(
        &self,
        request: &CreditNoteRequest,
    ) -> Result<CreditNote, LedgerError>;
}

/// Unused share of the monthly fee for a service ending at `now`.
///
/// Whole days left in the paid period, capped at one billing cycle, times
/// the daily rate, rounded to cents. Zero when nothing was prepaid.
pub fn prorated_credit(
    monthly_fee: Decimal,
    paid_until: Option<DateTime<Utc>>,
    cycle_days: u32,
    now: DateTime<Utc>,
) -> Decimal {
    let Some(paid_until) = paid_until else {
        return Decimal::ZERO;
    };
    if cycle_days == 0 || monthly_fee <= Decimal::ZERO || paid_until <= now {
        return Decimal::ZERO;
    }

    let remaining_days = (paid_until - now).num_days().min(i64::from(cycle_days));
    if remaining_days <= 0 {
        return Decimal::ZERO;
    }
    (monthly_fee * Decimal::from(remaining_days) / Decimal::from(cycle_days)).round_dp(2)
}

#[derive(Debug, Clone)]
struct OpenInvoice {
    id: i64,
    customer_id: CustomerId,
    amount_due: Decimal,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: i64,
    invoices: Vec<OpenInvoice>,
    balances: HashMap<CustomerId, Decimal>,
    credit_notes: Vec<CreditNote>,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Ledger held in local memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an invoice, returning its id
    pub async fn add_invoice(&self, customer_id: CustomerId, amount_due: Decimal) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.invoices.push(OpenInvoice {
            id,
            customer_id,
            amount_due,
        });
        id
    }

    pub async fn balance(&self, customer_id: CustomerId) -> Decimal {
        self.state
            .lock()
            .await
            .balances
            .get(&customer_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn amount_due(&self, customer_id: CustomerId) -> Decimal {
        self.state
            .lock()
            .await
            .invoices
            .iter()
            .filter(|i| i.customer_id == customer_id)
            .map(|i| i.amount_due)
            .sum()
    }

    pub async fn credit_notes(&self) -> Vec<CreditNote> {
        self.state.lock().await.credit_notes.clone()
    }
}

#[async_trait]
impl BillingLedger for MemoryLedger {
    async fn apply_payment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentApplication, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.lock().await;
        let mut remaining = amount;
        let mut applications = Vec::new();

        for invoice in state
            .invoices
            .iter_mut()
            .filter(|i| i.customer_id == customer_id && i.amount_due > Decimal::ZERO)
        {
            if remaining <= Decimal::ZERO {
                break;
            }
            let applied = remaining.min(invoice.amount_due);
            invoice.amount_due -= applied;
            remaining -= applied;
            applications.push(InvoiceApplication {
                invoice_id: invoice.id,
                amount: applied,
            });
        }
        state.invoices.retain(|i| i.amount_due > Decimal::ZERO);

        let balance = state.balances.entry(customer_id).or_insert(Decimal::ZERO);
        *balance += remaining;
        let new_balance = *balance;

        info!(
            customer_id = customer_id,
            amount = %amount,
            reference = %reference,
            invoices = applications.len(),
            overpayment = %remaining,
            "Payment applied"
        );

        Ok(PaymentApplication {
            applications,
            overpayment: remaining,
            new_balance,
        })
    }

    async fn issue_credit_note(
        &self,
        request: &CreditNoteRequest,
    ) -> Result<CreditNote, LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(request.amount));
        }

        let mut state = self.state.lock().await;
        let id = state.next_id();
        let issued_at = Utc::now();
        let note = CreditNote {
            id,
            number: format!("CN-{}-{:05}", issued_at.format("%Y%m%d"), id),
            customer_id: request.customer_id,
            service_id: request.service_id,
            amount: request.amount,
            reason: request.reason.clone(),
            issued_at,
        };

        *state
            .balances
            .entry(request.customer_id)
            .or_insert(Decimal::ZERO) += request.amount;
        state.credit_notes.push(note.clone());
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_prorated_credit() {
        let now = Utc::now();
        let fee = Decimal::new(3000, 2);

        let paid_until = now + Duration::days(15) + Duration::hours(1);
        let half = prorated_credit(fee, Some(paid_until), 30, now);
        assert_eq!(half, Decimal::new(1500, 2));

        let capped = prorated_credit(fee, Some(now + Duration::days(90)), 30, now);
        assert_eq!(capped, fee);

        assert_eq!(prorated_credit(fee, Some(now - Duration::days(1)), 30, now), Decimal::ZERO);
        assert_eq!(prorated_credit(fee, None, 30, now), Decimal::ZERO);
        assert_eq!(
            prorated_credit(fee, Some(now + Duration::hours(5)), 30, now),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_payment_settles_oldest_first() {
        let ledger = MemoryLedger::new();
        let first = ledger.add_invoice(7, Decimal::new(2000, 2)).await;
        let second = ledger.add_invoice(7, Decimal::new(2000, 2)).await;
        ledger.add_invoice(8, Decimal::new(9900, 2)).await;

        let result = ledger.apply_payment(7, Decimal::new(3000, 2), "MPESA-1").await.unwrap();
        assert_eq!(
            result.applications,
            vec![
                InvoiceApplication { invoice_id: first, amount: Decimal::new(2000, 2) },
                InvoiceApplication { invoice_id: second, amount: Decimal::new(1000, 2) },
            ]
        );
        assert_eq!(result.overpayment, Decimal::ZERO);
        assert_eq!(ledger.amount_due(7).await, Decimal::new(1000, 2));

        let result = ledger.apply_payment(7, Decimal::new(2500, 2), "MPESA-2").await.unwrap();
        assert_eq!(result.overpayment, Decimal::new(1500, 2));
        assert_eq!(result.new_balance, Decimal::new(1500, 2));
        assert_eq!(ledger.amount_due(8).await, Decimal::new(9900, 2));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let ledger = MemoryLedger::new();
        assert!(ledger.apply_payment(1, Decimal::ZERO, "x").await.is_err());

        let request = CreditNoteRequest {
            customer_id: 1,
            service_id: 1,
            amount: Decimal::new(-5, 0),
            reason: "refund".to_string(),
        };
        assert!(ledger.issue_credit_note(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_credit_note_credits_wallet() {
        let ledger = MemoryLedger::new();
        let request = CreditNoteRequest {
            customer_id: 3,
            service_id: 9,
            amount: Decimal::new(1250, 2),
            reason: "service terminated".to_string(),
        };
        let note = ledger.issue_credit_note(&request).await.unwrap();
        assert!(note.number.starts_with("CN-"));
        assert_eq!(ledger.balance(3).await, Decimal::new(1250, 2));
        assert_eq!(ledger.credit_notes().await.len(), 1);
    }
}
