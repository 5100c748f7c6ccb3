//! Mobile-money gateway adapter. Wraps the provider's OAuth + STK-push API
//! behind the `PaymentGateway` trait and normalizes its asynchronous
//! callback into a `PaymentEvent`. The adapter owns no booking or payment
//! state; a rejected or unreachable provider surfaces as `Error::Gateway`
//! and leaves the caller's records untouched.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::Utc;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use shared::{Error, PaymentEvent, PaymentOutcome};
use tokio::sync::Mutex;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Provider acknowledgment of a submitted charge. The external reference is
/// the checkout-request id the later callback is correlated by.
#[derive(Debug, Clone)]
pub struct ChargeHandle {
    pub external_reference: String,
    pub merchant_request_id: String,
    pub customer_message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Submit a charge of `amount` to `phone`, keyed by `account_reference`.
    /// The outcome arrives later through the callback; success here only
    /// means the provider accepted the request.
    async fn initiate(
        &self,
        phone: &str,
        amount: &BigDecimal,
        account_reference: &str,
    ) -> Result<ChargeHandle, Error>;
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct MpesaGateway {
    config: MpesaConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "CustomerMessage")]
    customer_message: String,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Gateway(format!("failed to build http client: {e}")))?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self, force_refresh: bool) -> Result<String, Error> {
        let mut cached = self.token.lock().await;
        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.token.clone());
                }
            }
        }

        let response = self
            .client
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.config.base_url
            ))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Gateway(format!(
                "token request rejected with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("malformed token response: {e}")))?;

        let ttl = token.expires_in.parse::<u64>().unwrap_or(3599);
        let expires_at = Instant::now() + Duration::from_secs(ttl).saturating_sub(TOKEN_REFRESH_MARGIN);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            token: token.access_token,
            expires_at,
        });
        info!("provider access token refreshed, ttl {}s", ttl);
        Ok(access_token)
    }

    async fn submit_stk_push(
        &self,
        token: &str,
        phone: &str,
        amount: u64,
        account_reference: &str,
    ) -> Result<reqwest::Response, Error> {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ));

        self.client
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "BusinessShortCode": self.config.shortcode,
                "Password": password,
                "Timestamp": timestamp,
                "TransactionType": "CustomerPayBillOnline",
                "Amount": amount,
                "PartyA": phone,
                "PartyB": self.config.shortcode,
                "PhoneNumber": phone,
                "CallBackURL": self.config.callback_url,
                "AccountReference": account_reference,
                "TransactionDesc": "Gaming session payment",
            }))
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("charge request failed: {e}")))
    }

    #[cfg(test)]
    async fn prime_token(&self, token: &str) {
        *self.token.lock().await = Some(CachedToken {
            token: token.to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        });
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn initiate(
        &self,
        phone: &str,
        amount: &BigDecimal,
        account_reference: &str,
    ) -> Result<ChargeHandle, Error> {
        let whole_amount = amount
            .to_u64()
            .ok_or_else(|| Error::Validation("amount is not chargeable".into()))?;

        let token = self.access_token(false).await?;
        let mut response = self
            .submit_stk_push(&token, phone, whole_amount, account_reference)
            .await?;

        // A 401 means the cached token went stale server-side; refresh and
        // retry once.
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("provider rejected access token, refreshing");
            let token = self.access_token(true).await?;
            response = self
                .submit_stk_push(&token, phone, whole_amount, account_reference)
                .await?;
        }

        if !response.status().is_success() {
            return Err(Error::Gateway(format!(
                "charge request rejected with status {}",
                response.status()
            )));
        }

        let push: StkPushResponse = response
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("malformed charge response: {e}")))?;

        if push.response_code != "0" {
            return Err(Error::Gateway(format!(
                "charge request declined: {}",
                push.response_description
            )));
        }

        info!(
            "charge submitted for {} (ref {})",
            account_reference, push.checkout_request_id
        );
        Ok(ChargeHandle {
            external_reference: push.checkout_request_id,
            merchant_request_id: push.merchant_request_id,
            customer_message: push.customer_message,
        })
    }
}

/// Normalizes a Kenyan subscriber number to international MSISDN form
/// (254XXXXXXXXX). Accepts `07…`/`01…`, `+254…` and `254…` input.
pub fn normalize_msisdn(raw: &str) -> Result<String, Error> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation(format!("invalid phone number '{raw}'")));
    }

    if digits.len() == 12 && digits.starts_with("254") {
        Ok(digits.to_string())
    } else if digits.len() == 10 && (digits.starts_with("07") || digits.starts_with("01")) {
        Ok(format!("254{}", &digits[1..]))
    } else {
        Err(Error::Validation(format!("invalid phone number '{raw}'")))
    }
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: i64,
    #[serde(rename = "ResultDesc")]
    result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item")]
    item: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: Option<serde_json::Value>,
}

/// Pure normalization of the provider's callback envelope. A result code of
/// zero is success; anything else is a failure carrying the provider's
/// description. No state is touched here.
pub fn parse_callback(raw: &serde_json::Value) -> Result<PaymentEvent, Error> {
    let envelope: CallbackEnvelope = serde_json::from_value(raw.clone())
        .map_err(|e| Error::MalformedCallback(e.to_string()))?;
    let callback = envelope.body.stk_callback;

    if callback.checkout_request_id.is_empty() {
        return Err(Error::MalformedCallback(
            "missing checkout request id".into(),
        ));
    }

    let metadata = |name: &str| -> Option<serde_json::Value> {
        callback
            .callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == name)?
            .value
            .clone()
    };

    let provider_txn_id = metadata("MpesaReceiptNumber")
        .and_then(|v| v.as_str().map(str::to_string));
    let amount = metadata("Amount")
        .and_then(|v| v.as_f64())
        .and_then(BigDecimal::from_f64);

    let outcome = if callback.result_code == 0 {
        PaymentOutcome::Success
    } else {
        PaymentOutcome::Failure
    };

    Ok(PaymentEvent {
        external_reference: callback.checkout_request_id,
        outcome,
        provider_txn_id,
        amount,
        description: callback.result_desc,
    })
}
