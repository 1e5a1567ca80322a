//! Upload profiles
//!
//! A profile supplies everything that differs between pipelines: the owner
//! context, the storage index key, the three request shapes and how the sign
//! response is read. Invoices upload with a raw `PUT`; transaction receipts
//! upload a multipart form to a pre-signed `POST` target.

use std::collections::BTreeMap;
use std::sync::Arc;

use docsync_http::{join_url, FilePart, HttpRequest, MultipartForm};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::entities::{OwnerContext, SignedTarget};
use crate::domain::migration::LegacyDecoder;
use crate::pipeline::executors::StageError;

/// Content type used when the sign response does not dictate one
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Pipeline-specific request shapes and record layout.
pub trait UploadProfile: Send + Sync + 'static {
    type Owner: OwnerContext;

    /// Short name used in logs and progress events
    fn name(&self) -> &'static str;

    /// Key of the index entry in the key-value store
    fn index_key(&self) -> &'static str;

    /// Request for a signed upload target
    fn sign_request(&self, file_name: &str, owner: &Self::Owner) -> HttpRequest;

    /// Read the sign response body
    fn parse_signed_target(&self, data: &Value) -> Result<SignedTarget, StageError>;

    /// Request transferring the file to the signed target
    fn upload_request(&self, target: &SignedTarget, file_name: &str, data: Vec<u8>) -> HttpRequest;

    /// Request creating the backend record
    fn register_request(&self, target: &SignedTarget, owner: &Self::Owner) -> HttpRequest;

    /// Owner context from an unversioned record
    fn legacy_owner(&self, raw: &Map<String, Value>) -> Option<Self::Owner>;
}

/// Reads unversioned records for a profile
pub struct ProfileDecoder<P>(pub Arc<P>);

impl<P: UploadProfile> LegacyDecoder<P::Owner> for ProfileDecoder<P> {
    fn decode_owner(&self, raw: &Map<String, Value>) -> Option<P::Owner> {
        self.0.legacy_owner(raw)
    }

    fn decode_target(&self, raw: &Value) -> Option<SignedTarget> {
        self.0.parse_signed_target(raw).ok()
    }
}

fn required_str<'a>(data: &'a Value, field: &str) -> Result<&'a str, StageError> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            StageError::InvalidResponse(format!("sign response is missing '{}'", field))
        })
}

/// Ids arrive as numbers or numeric strings depending on the backend version
fn id_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- Invoices ---

/// Owner of an invoice upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceOwner {
    pub restaurant_id: i64,
    /// Extra fields merged into the registration body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

impl InvoiceOwner {
    pub fn new(restaurant_id: i64) -> Self {
        Self {
            restaurant_id,
            options: None,
        }
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = Some(options);
        self
    }
}

/// Invoice photos for a restaurant
#[derive(Debug, Clone)]
pub struct InvoiceProfile {
    api_base_url: String,
}

impl InvoiceProfile {
    pub const INDEX_KEY: &'static str = "pending_uploads";

    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
        }
    }
}

impl UploadProfile for InvoiceProfile {
    type Owner = InvoiceOwner;

    fn name(&self) -> &'static str {
        "invoices"
    }

    fn index_key(&self) -> &'static str {
        Self::INDEX_KEY
    }

    fn sign_request(&self, file_name: &str, owner: &InvoiceOwner) -> HttpRequest {
        HttpRequest::get(join_url(&self.api_base_url, "invoice/s3sign/"))
            .with_query("filename", file_name)
            .with_query("restaurant", owner.restaurant_id.to_string())
            .authenticated()
    }

    fn parse_signed_target(&self, data: &Value) -> Result<SignedTarget, StageError> {
        let mut target = SignedTarget::new(
            required_str(data, "put_request")?,
            required_str(data, "url")?,
        );
        target.registration_id = data.get("upload_id").filter(|v| !v.is_null()).cloned();
        Ok(target)
    }

    fn upload_request(&self, target: &SignedTarget, _file_name: &str, data: Vec<u8>) -> HttpRequest {
        let content_type = target
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        HttpRequest::put(target.upload_url.as_str()).with_bytes(data, content_type)
    }

    fn register_request(&self, target: &SignedTarget, owner: &InvoiceOwner) -> HttpRequest {
        let mut body = Map::new();
        body.insert("image".to_string(), Value::String(target.public_url.clone()));
        body.insert(
            "upload_id".to_string(),
            target.registration_id.clone().unwrap_or(Value::Null),
        );
        body.insert("restaurant".to_string(), Value::from(owner.restaurant_id));
        if let Some(options) = &owner.options {
            for (key, value) in options {
                body.insert(key.clone(), value.clone());
            }
        }

        HttpRequest::post(join_url(&self.api_base_url, "invoice/"))
            .with_json(Value::Object(body))
            .authenticated()
    }

    fn legacy_owner(&self, raw: &Map<String, Value>) -> Option<InvoiceOwner> {
        let restaurant_id = raw.get("restaurant")?.get("id").and_then(id_value)?;
        Some(InvoiceOwner {
            restaurant_id,
            options: raw.get("options").and_then(Value::as_object).cloned(),
        })
    }
}

// --- Transaction receipts ---

/// Owner of a receipt upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOwner {
    pub transaction_id: i64,
    pub company_id: i64,
}

impl ReceiptOwner {
    pub fn new(transaction_id: i64, company_id: i64) -> Self {
        Self {
            transaction_id,
            company_id,
        }
    }
}

/// Receipt photos attached to card transactions
#[derive(Debug, Clone)]
pub struct ReceiptProfile {
    spend_api_base_url: String,
}

impl ReceiptProfile {
    pub const INDEX_KEY: &'static str = "pending_transaction_uploads";

    pub fn new(spend_api_base_url: impl Into<String>) -> Self {
        Self {
            spend_api_base_url: spend_api_base_url.into(),
        }
    }
}

impl UploadProfile for ReceiptProfile {
    type Owner = ReceiptOwner;

    fn name(&self) -> &'static str {
        "receipts"
    }

    fn index_key(&self) -> &'static str {
        Self::INDEX_KEY
    }

    fn sign_request(&self, file_name: &str, _owner: &ReceiptOwner) -> HttpRequest {
        HttpRequest::post(join_url(&self.spend_api_base_url, "v0/s3sign/"))
            .with_json(serde_json::json!({ "filename": file_name }))
            .authenticated()
    }

    fn parse_signed_target(&self, data: &Value) -> Result<SignedTarget, StageError> {
        let mut target = SignedTarget::new(
            required_str(data, "put_request")?,
            required_str(data, "url")?,
        );

        let fields = data
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                StageError::InvalidResponse("sign response is missing 'fields'".to_string())
            })?;
        target.fields = fields
            .iter()
            .map(|(key, value)| (key.clone(), form_value(value)))
            .collect::<BTreeMap<_, _>>();

        target.content_type = data
            .get("headers")
            .and_then(Value::as_object)
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .and_then(|(_, value)| value.as_str())
            })
            .map(str::to_string);

        Ok(target)
    }

    fn upload_request(&self, target: &SignedTarget, file_name: &str, data: Vec<u8>) -> HttpRequest {
        let content_type = target
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let form = MultipartForm {
            fields: target
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            file: FilePart {
                field_name: "file".to_string(),
                file_name: file_name.to_string(),
                content_type,
                data,
            },
        };

        HttpRequest::post(target.upload_url.as_str())
            .with_header("x-amz-acl", "public-read")
            .with_multipart(form)
    }

    fn register_request(&self, target: &SignedTarget, owner: &ReceiptOwner) -> HttpRequest {
        HttpRequest::post(join_url(&self.spend_api_base_url, "v0/transaction-receipt/"))
            .with_query("company", owner.company_id.to_string())
            .with_json(serde_json::json!({
                "url": target.public_url,
                "transaction": owner.transaction_id,
            }))
            .authenticated()
    }

    fn legacy_owner(&self, raw: &Map<String, Value>) -> Option<ReceiptOwner> {
        Some(ReceiptOwner {
            transaction_id: raw.get("transaction_id").and_then(id_value)?,
            company_id: raw.get("company_id").and_then(id_value)?,
        })
    }
}
