//! Payment domain types shared by the store, gateway client, poller and
//! webhook path.

use crate::core::{AppError, AppResult};
use chrono::{DateTime, Utc};

/// Lifecycle status of a payment.
///
/// `Pending` is the only non-terminal state. Terminal states are immutable:
/// the store refuses (as a no-op, not an error) any transition out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Canceled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "canceled" => Some(PaymentStatus::Canceled),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Course tariff. `WithSupport` adds mentorship contact after purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tariff {
    Basic,
    WithSupport,
}

impl Tariff {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tariff::Basic => "basic",
            Tariff::WithSupport => "with_support",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Tariff::Basic),
            "with_support" => Some(Tariff::WithSupport),
            _ => None,
        }
    }
}

/// What was purchased. Each variant carries only the reference fields that
/// make sense for it, so "exactly one product-reference group populated"
/// holds by construction rather than by convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Product {
    Course { slug: String, tariff: Tariff },
    MiniCourse { slug: String },
    Consultation { kind: String, option: String },
    Guide { guide_id: String },
    ChannelSubscription,
}

impl Product {
    /// Tag stored in the `product_type` column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Product::Course { .. } => "course",
            Product::MiniCourse { .. } => "mini_course",
            Product::Consultation { .. } => "consultation",
            Product::Guide { .. } => "guide",
            Product::ChannelSubscription => "channel_subscription",
        }
    }

    /// Split into the three DB columns: (type tag, primary ref, secondary ref).
    pub fn to_columns(&self) -> (&'static str, Option<&str>, Option<&str>) {
        match self {
            Product::Course { slug, tariff } => ("course", Some(slug.as_str()), Some(tariff.as_str())),
            Product::MiniCourse { slug } => ("mini_course", Some(slug.as_str()), None),
            Product::Consultation { kind, option } => ("consultation", Some(kind.as_str()), Some(option.as_str())),
            Product::Guide { guide_id } => ("guide", Some(guide_id.as_str()), None),
            Product::ChannelSubscription => ("channel_subscription", None, None),
        }
    }

    /// Rebuild from the DB columns. A malformed row (unknown tag, missing
    /// reference) is a data-integrity error for that single record.
    pub fn from_columns(tag: &str, primary: Option<String>, secondary: Option<String>) -> AppResult<Self> {
        let missing = |field: &str| AppError::Validation(format!("product '{}' is missing {}", tag, field));
        match tag {
            "course" => {
                let slug = primary.ok_or_else(|| missing("slug"))?;
                let raw = secondary.ok_or_else(|| missing("tariff"))?;
                let tariff =
                    Tariff::parse(&raw).ok_or_else(|| AppError::Validation(format!("unknown tariff '{}'", raw)))?;
                Ok(Product::Course { slug, tariff })
            }
            "mini_course" => Ok(Product::MiniCourse {
                slug: primary.ok_or_else(|| missing("slug"))?,
            }),
            "consultation" => Ok(Product::Consultation {
                kind: primary.ok_or_else(|| missing("kind"))?,
                option: secondary.ok_or_else(|| missing("option"))?,
            }),
            "guide" => Ok(Product::Guide {
                guide_id: primary.ok_or_else(|| missing("guide_id"))?,
            }),
            "channel_subscription" => Ok(Product::ChannelSubscription),
            other => Err(AppError::Validation(format!("unknown product type '{}'", other))),
        }
    }
}

/// A locally recorded payment. Created in `Pending` before the gateway
/// necessarily has a record; `external_id` and `confirmation_url` are filled
/// in once the gateway accepts the creation request.
#[derive(Debug, Clone)]
pub struct Payment {
    /// Internal id (uuid), stable for the record's lifetime.
    pub id: String,
    /// Telegram id of the purchasing user.
    pub user_id: i64,
    /// Amount in kopecks.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub product: Product,
    /// Gateway-assigned payment id. None until creation completes.
    pub external_id: Option<String>,
    /// Checkout redirect URL, set once.
    pub confirmation_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Non-null iff status == Succeeded.
    pub paid_at: Option<DateTime<Utc>>,
    /// Coordinates of the invoice message, for later in-place edits.
    pub chat_id: Option<i64>,
    pub message_id: Option<i32>,
}

impl Payment {
    /// Amount formatted in rubles ("5000.00").
    pub fn amount_rub(&self) -> String {
        format!("{}.{:02}", self.amount / 100, self.amount % 100)
    }

    /// Status line shown to a user who asks "where is my payment?".
    /// A pending payment (or an unreachable gateway) reads as "not yet
    /// processed", never as a hard error.
    pub fn user_facing_status(&self) -> &'static str {
        match self.status {
            PaymentStatus::Pending => "Платёж ещё не обработан, проверьте чуть позже.",
            PaymentStatus::Succeeded => "Платёж прошёл успешно!",
            PaymentStatus::Canceled => "Платёж отменён.",
            PaymentStatus::Failed => "Платёж не прошёл. Попробуйте ещё раз.",
        }
    }
}

/// Gateway-side view of a payment, as returned by create/fetch.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub external_id: String,
    pub status: PaymentStatus,
    pub paid: bool,
    /// Amount in kopecks.
    pub amount: i64,
    pub currency: String,
    pub confirmation_url: Option<String>,
    /// Saved payment method id, present when the payment was created with
    /// `save_payment_method` (used for subscription auto-renewal).
    pub payment_method_id: Option<String>,
}

/// Parsed inbound webhook notification.
#[derive(Debug, Clone)]
pub struct GatewayNotification {
    /// Raw event name, e.g. "payment.succeeded".
    pub event: String,
    pub external_id: String,
    pub status: PaymentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_columns_round_trip() {
        let products = [
            Product::Course {
                slug: "marketing".into(),
                tariff: Tariff::WithSupport,
            },
            Product::MiniCourse { slug: "intro".into() },
            Product::Consultation {
                kind: "nutrition".into(),
                option: "60min".into(),
            },
            Product::Guide {
                guide_id: "sleep-guide".into(),
            },
            Product::ChannelSubscription,
        ];
        for product in products {
            let (tag, primary, secondary) = product.to_columns();
            let rebuilt = Product::from_columns(
                tag,
                primary.map(str::to_string),
                secondary.map(str::to_string),
            )
            .unwrap();
            assert_eq!(rebuilt, product);
        }
    }

    #[test]
    fn malformed_product_rows_are_rejected() {
        assert!(Product::from_columns("course", None, None).is_err());
        assert!(Product::from_columns("course", Some("x".into()), Some("vip".into())).is_err());
        assert!(Product::from_columns("subscription2", None, None).is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(PaymentStatus::Canceled.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn pending_status_reads_as_not_yet_processed() {
        let mut payment = Payment {
            id: "p2".into(),
            user_id: 1,
            amount: 99_000,
            currency: "RUB".into(),
            status: PaymentStatus::Pending,
            product: Product::ChannelSubscription,
            external_id: None,
            confirmation_url: None,
            created_at: Utc::now(),
            paid_at: None,
            chat_id: None,
            message_id: None,
        };
        // An unsettled payment is "not processed yet", never an error.
        assert!(payment.user_facing_status().contains("не обработан"));
        payment.status = PaymentStatus::Failed;
        assert!(payment.user_facing_status().contains("не прошёл"));
    }

    #[test]
    fn amount_formatting() {
        let payment = Payment {
            id: "p1".into(),
            user_id: 1,
            amount: 500_000,
            currency: "RUB".into(),
            status: PaymentStatus::Pending,
            product: Product::ChannelSubscription,
            external_id: None,
            confirmation_url: None,
            created_at: Utc::now(),
            paid_at: None,
            chat_id: None,
            message_id: None,
        };
        assert_eq!(payment.amount_rub(), "5000.00");
    }
}
