/// Payment lifecycle and subscription bookkeeping
use super::{
    packages, standing, CheckoutRequest, GatewayStatus, InitializePaymentRequest,
    InitializedPayment, Payment, PaymentGateway, PaymentStatus, Settlement, Subscription,
    SubscriptionStatusProvider, SubscriptionStatusView,
};
use crate::{
    account::{Capability, Role},
    config::PaymentConfig,
    db::models::{PaymentRow, SubscriptionRow},
    error::{EstateError, EstateResult},
    metrics,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;

const PAYMENT_COLUMNS: &str = "id, user_id, tx_ref, package_type, period, amount, currency, \
     plan_id, status, gateway_transaction_id, created_at, paid_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, payment_id, package_type, period, status, starts_at, expires_at, created_at";

/// Aggregate payment figures for the admin dashboard
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub paid_payments: i64,
    pub pending_payments: i64,
    pub revenue: i64,
    pub active_subscriptions: i64,
}

pub struct PaymentManager {
    db: SqlitePool,
    config: PaymentConfig,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentManager {
    pub fn new(
        db: SqlitePool,
        config: PaymentConfig,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self { db, config, gateway }
    }

    /// Priced catalogue
    pub fn packages(&self) -> Vec<super::Package> {
        packages(self.config.monthly_price, &self.config.currency)
    }

    fn generate_tx_ref() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| (b as char).to_ascii_uppercase())
            .collect();
        format!("EG-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
    }

    /// Record a pending payment and open a gateway checkout for it
    pub async fn initialize_payment(
        &self,
        user_id: &str,
        role: Role,
        request: InitializePaymentRequest,
    ) -> EstateResult<InitializedPayment> {
        if !role.has(Capability::MakePayments) {
            return Err(EstateError::Authorization(format!(
                "Role {} cannot make payments",
                role
            )));
        }

        let expected = self
            .packages()
            .into_iter()
            .find(|p| p.package_type == request.package_type && p.period == request.period)
            .ok_or_else(|| EstateError::Validation("Unknown package".to_string()))?;
        if request.amount != expected.amount {
            return Err(EstateError::Validation(format!(
                "Amount {} does not match package price {}",
                request.amount, expected.amount
            )));
        }

        let (email, name): (String, String) =
            sqlx::query_as("SELECT email, name FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| EstateError::NotFound("User not found".to_string()))?;

        let tx_ref = Self::generate_tx_ref();
        let plan_id = request
            .plan_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        sqlx::query(
            r#"
            INSERT INTO payments (user_id, tx_ref, package_type, period, amount, currency,
                                  plan_id, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
            "#,
        )
        .bind(user_id)
        .bind(&tx_ref)
        .bind(request.package_type.as_str())
        .bind(request.period.as_str())
        .bind(expected.amount)
        .bind(&self.config.currency)
        .bind(&plan_id)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        tracing::info!(
            user_id,
            tx_ref = %tx_ref,
            package = request.package_type.as_str(),
            period = request.period.as_str(),
            amount = expected.amount,
            "Initialized payment"
        );

        let checkout_link = match &self.gateway {
            Some(gateway) => {
                let checkout = CheckoutRequest {
                    tx_ref: tx_ref.clone(),
                    amount: expected.amount,
                    currency: self.config.currency.clone(),
                    customer_email: email,
                    customer_name: name,
                    plan_id,
                    description: format!(
                        "{} subscription ({})",
                        request.package_type.as_str(),
                        request.period.as_str()
                    ),
                };
                Some(gateway.create_checkout(&checkout).await?)
            }
            None => {
                tracing::warn!(tx_ref = %tx_ref, "No payment gateway configured, checkout skipped");
                None
            }
        };

        Ok(InitializedPayment {
            tx_ref,
            amount: expected.amount,
            currency: self.config.currency.clone(),
            checkout_link,
        })
    }

    /// Verify a payment on behalf of its owner
    pub async fn verify_payment(
        &self,
        tx_ref: &str,
        user_id: &str,
        role: Role,
    ) -> EstateResult<Settlement> {
        let payment = self.find_payment(tx_ref).await?;
        if payment.user_id != user_id && !role.has(Capability::Administer) {
            return Err(EstateError::Authorization(
                "Payment belongs to another user".to_string(),
            ));
        }
        self.settle(payment).await
    }

    /// Check the `verif-hash` header sent with gateway webhooks
    pub fn check_webhook_hash(&self, provided: Option<&str>) -> EstateResult<()> {
        let expected = self
            .config
            .gateway
            .as_ref()
            .and_then(|g| g.webhook_hash.as_deref())
            .ok_or_else(|| EstateError::Authentication("Webhooks are not enabled".to_string()))?;

        match provided {
            Some(hash) if secrets_match(hash, expected) => Ok(()),
            _ => Err(EstateError::Authentication("Invalid webhook signature".to_string())),
        }
    }

    /// Settle a payment announced by a gateway webhook.
    ///
    /// The webhook body is only a hint; the outcome always comes from the
    /// gateway's verification endpoint.
    pub async fn handle_webhook(&self, tx_ref: &str) -> EstateResult<Settlement> {
        let payment = self.find_payment(tx_ref).await?;
        self.settle(payment).await
    }

    async fn settle(&self, payment: Payment) -> EstateResult<Settlement> {
        if payment.status == PaymentStatus::Paid {
            return self.settlement_for(payment).await;
        }

        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| EstateError::Gateway("Payment gateway is not configured".to_string()))?;
        let verification = gateway.verify(&payment.tx_ref).await?;

        match verification.status {
            GatewayStatus::Pending => {
                tracing::debug!(tx_ref = %payment.tx_ref, "Payment still pending at gateway");
                Ok(Settlement {
                    payment,
                    subscription: None,
                    standing: None,
                })
            }
            GatewayStatus::Failed => {
                let payment = self.mark_failed(payment).await?;
                Ok(Settlement {
                    payment,
                    subscription: None,
                    standing: None,
                })
            }
            GatewayStatus::Successful => {
                let amount_ok = verification.amount + f64::EPSILON >= payment.amount as f64;
                let currency_ok = verification.currency.eq_ignore_ascii_case(&payment.currency);
                if verification.tx_ref != payment.tx_ref || !amount_ok || !currency_ok {
                    tracing::warn!(
                        tx_ref = %payment.tx_ref,
                        charged = verification.amount,
                        currency = %verification.currency,
                        "Gateway transaction does not match payment"
                    );
                    self.mark_failed(payment).await?;
                    return Err(EstateError::Validation(
                        "Gateway transaction does not match the payment".to_string(),
                    ));
                }
                self.apply_settlement(payment, verification.transaction_id)
                    .await
            }
        }
    }

    /// Mark paid, open the subscription window and refresh the payer's
    /// counters atomically. A concurrent settlement of the same payment
    /// loses the conditional update and returns the winner's result.
    async fn apply_settlement(
        &self,
        payment: Payment,
        transaction_id: Option<String>,
    ) -> EstateResult<Settlement> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query(
            "UPDATE payments SET status = 'paid', paid_at = ?1, gateway_transaction_id = ?2
             WHERE id = ?3 AND status != 'paid'",
        )
        .bind(now)
        .bind(&transaction_id)
        .bind(payment.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            let payment = self.find_payment(&payment.tx_ref).await?;
            return self.settlement_for(payment).await;
        }

        // Renewals stack onto the current window
        let current_expiry: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT expires_at FROM subscriptions
             WHERE user_id = ?1 AND status = 'active' AND expires_at > ?2
             ORDER BY expires_at DESC LIMIT 1",
        )
        .bind(&payment.user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let months = payment.period.months();
        let starts_at = current_expiry.map_or(now, |expiry| expiry.max(now));
        let expires_at = starts_at
            .checked_add_months(Months::new(months))
            .ok_or_else(|| EstateError::Internal("Subscription end out of range".to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, payment_id, package_type, period, status,
                                       starts_at, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7)
            "#,
        )
        .bind(&payment.user_id)
        .bind(payment.id)
        .bind(payment.package_type.as_str())
        .bind(payment.period.as_str())
        .bind(starts_at)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET payment_count = payment_count + ?1 WHERE id = ?2")
            .bind(i64::from(months))
            .bind(&payment.user_id)
            .execute(&mut *tx)
            .await?;

        let (payment_count, registered_at): (i64, DateTime<Utc>) =
            sqlx::query_as("SELECT payment_count, created_at FROM users WHERE id = ?1")
                .bind(&payment.user_id)
                .fetch_one(&mut *tx)
                .await?;
        let standing = standing::compute(payment_count, registered_at, now);

        sqlx::query("UPDATE users SET is_up_to_date = ?1 WHERE id = ?2")
            .bind(standing.is_up_to_date)
            .bind(&payment.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::PAYMENTS_SETTLED_TOTAL
            .with_label_values(&[payment.package_type.as_str(), payment.period.as_str()])
            .inc();
        tracing::info!(
            user_id = %payment.user_id,
            tx_ref = %payment.tx_ref,
            months,
            %expires_at,
            "Payment settled"
        );

        let subscription = Subscription {
            id: inserted.last_insert_rowid(),
            user_id: payment.user_id.clone(),
            payment_id: payment.id,
            package_type: payment.package_type,
            period: payment.period,
            status: "active".to_string(),
            starts_at,
            expires_at,
            created_at: now,
        };
        let payment = Payment {
            status: PaymentStatus::Paid,
            paid_at: Some(now),
            gateway_transaction_id: transaction_id,
            ..payment
        };

        Ok(Settlement {
            payment,
            subscription: Some(subscription),
            standing: Some(standing),
        })
    }

    async fn mark_failed(&self, payment: Payment) -> EstateResult<Payment> {
        let updated = sqlx::query(
            "UPDATE payments SET status = 'failed' WHERE id = ?1 AND status != 'paid'",
        )
        .bind(payment.id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return self.find_payment(&payment.tx_ref).await;
        }

        tracing::info!(tx_ref = %payment.tx_ref, "Payment failed at gateway");
        Ok(Payment {
            status: PaymentStatus::Failed,
            ..payment
        })
    }

    /// Already-settled payment with its subscription and the owner's standing
    async fn settlement_for(&self, payment: Payment) -> EstateResult<Settlement> {
        let subscription: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE payment_id = ?1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(payment.id)
        .fetch_optional(&self.db)
        .await?;

        let standing = self.standing(&payment.user_id).await?;

        Ok(Settlement {
            subscription: subscription.map(Subscription::try_from).transpose()?,
            standing: Some(standing),
            payment,
        })
    }

    pub async fn find_payment(&self, tx_ref: &str) -> EstateResult<Payment> {
        let row: PaymentRow = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE tx_ref = ?1",
            PAYMENT_COLUMNS
        ))
        .bind(tx_ref.trim())
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EstateError::NotFound("Payment not found".to_string()))?;

        Payment::try_from(row)
    }

    /// A user's payments, newest first
    pub async fn history(&self, user_id: &str, limit: i64) -> EstateResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            PAYMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    /// Subscription window covering now, if any
    pub async fn current_subscription(&self, user_id: &str) -> EstateResult<Option<Subscription>> {
        let now = Utc::now();
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions
             WHERE user_id = ?1 AND status = 'active' AND starts_at <= ?2 AND expires_at > ?2
             ORDER BY expires_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    pub async fn standing(&self, user_id: &str) -> EstateResult<standing::Standing> {
        let (payment_count, registered_at): (i64, DateTime<Utc>) =
            sqlx::query_as("SELECT payment_count, created_at FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| EstateError::NotFound("User not found".to_string()))?;

        Ok(standing::compute(payment_count, registered_at, Utc::now()))
    }

    pub async fn subscription_status(&self, user_id: &str) -> EstateResult<SubscriptionStatusView> {
        let subscription = self.current_subscription(user_id).await?;
        let standing = self.standing(user_id).await?;

        Ok(SubscriptionStatusView {
            active: subscription.is_some(),
            subscription,
            standing,
        })
    }

    /// Flip windows that have run out to `expired`
    pub async fn expire_subscriptions(&self) -> EstateResult<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'expired' WHERE status = 'active' AND expires_at <= ?1",
        )
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Recompute `is_up_to_date` for every paying account; returns how many changed
    pub async fn refresh_standings(&self) -> EstateResult<u64> {
        let rows: Vec<(String, i64, DateTime<Utc>, bool)> = sqlx::query_as(
            "SELECT id, payment_count, created_at, is_up_to_date FROM users
             WHERE role IN ('landlord', 'resident') AND deactivated_at IS NULL",
        )
        .fetch_all(&self.db)
        .await?;

        let now = Utc::now();
        let mut changed = 0;
        for (user_id, payment_count, registered_at, was_up_to_date) in rows {
            let standing = standing::compute(payment_count, registered_at, now);
            if standing.is_up_to_date == was_up_to_date {
                continue;
            }

            sqlx::query("UPDATE users SET is_up_to_date = ?1 WHERE id = ?2")
                .bind(standing.is_up_to_date)
                .bind(&user_id)
                .execute(&self.db)
                .await?;
            changed += 1;

            if !standing.is_up_to_date {
                tracing::info!(
                    user_id = %user_id,
                    payment_count,
                    required = standing.required_payments,
                    "Account fell behind on payments"
                );
            }
        }

        Ok(changed)
    }

    /// Give up on checkouts that were never completed
    pub async fn abandon_stale_payments(&self, max_age: Duration) -> EstateResult<u64> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'abandoned' WHERE status = 'pending' AND created_at < ?1",
        )
        .bind(Utc::now() - max_age)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> EstateResult<PaymentStats> {
        let (paid_payments, revenue): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM payments WHERE status = 'paid'",
        )
        .fetch_one(&self.db)
        .await?;

        let pending_payments: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE status = 'pending'")
                .fetch_one(&self.db)
                .await?;

        let active_subscriptions: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE status = 'active' AND expires_at > ?1",
        )
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        Ok(PaymentStats {
            paid_payments,
            pending_payments,
            revenue,
            active_subscriptions,
        })
    }
}

#[async_trait]
impl SubscriptionStatusProvider for PaymentManager {
    async fn is_subscription_active(&self, user_id: &str) -> EstateResult<bool> {
        Ok(self.current_subscription(user_id).await?.is_some())
    }
}

/// Constant-time comparison of two shared secrets over their digests
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
