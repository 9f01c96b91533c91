//! STK push callback envelope and the settlement it resolves to.
//!
//! The provider posts `{"Body":{"stkCallback":{...}}}` once the customer
//! accepts, declines or ignores the prompt on their handset.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result code the provider uses for a completed payment.
pub const RESULT_CODE_SUCCESS: i64 = 0;

/// Offset of the provider's local timestamps (East Africa Time).
const PROVIDER_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// The provider's outer callback envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: serde_json::Value,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// What the provider reported for one push request.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Succeeded {
        receipt: Option<String>,
        amount: Option<Decimal>,
        settled_at: Option<DateTime<Utc>>,
    },
    Failed {
        code: i64,
        reason: String,
    },
}

/// A provider result addressed to a registration by correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub gateway_request_id: String,
    pub outcome: PaymentOutcome,
}

/// Acknowledgement body returned to the provider for every callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub result_code: i32,
    pub result_desc: String,
}

impl CallbackAck {
    pub fn processed() -> Self {
        Self {
            result_code: 0,
            result_desc: "Callback processed".to_string(),
        }
    }
}

impl StkCallback {
    /// Numeric result code; the provider sends a number, some relays send a string.
    pub fn result_code(&self) -> Option<i64> {
        match &self.result_code {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn item(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }
}

impl StkCallbackEnvelope {
    /// Resolves the envelope into a settlement.
    ///
    /// An unreadable result code is treated as a failure so the
    /// registration never confirms on an ambiguous callback.
    pub fn into_settlement(self) -> Settlement {
        let callback = self.body.stk_callback;
        let description = callback
            .result_desc
            .clone()
            .unwrap_or_else(|| "No result description".to_string());

        let outcome = match callback.result_code() {
            Some(RESULT_CODE_SUCCESS) => PaymentOutcome::Succeeded {
                receipt: callback.item("MpesaReceiptNumber").and_then(value_as_string),
                amount: callback.item("Amount").and_then(value_as_decimal),
                settled_at: callback
                    .item("TransactionDate")
                    .and_then(value_as_string)
                    .and_then(|s| parse_provider_timestamp(&s)),
            },
            Some(code) => PaymentOutcome::Failed {
                code,
                reason: description,
            },
            None => PaymentOutcome::Failed {
                code: -1,
                reason: format!("Unreadable result code: {}", description),
            },
        };

        Settlement {
            gateway_request_id: callback.checkout_request_id,
            outcome,
        }
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_decimal(value: &serde_json::Value) -> Option<Decimal> {
    value_as_string(value)?.parse().ok()
}

/// Parses a `YYYYMMDDHHmmss` timestamp in provider local time.
pub fn parse_provider_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%d%H%M%S").ok()?;
    let offset = FixedOffset::east_opt(PROVIDER_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
