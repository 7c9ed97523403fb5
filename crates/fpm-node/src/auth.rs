use async_trait::async_trait;
use fpm_core::{unix_now, InboundRequest, Ledger, NodeId, PowerError, RequestVerifier, Result};
use fpm_crypto::signed;
use std::sync::Arc;

/// Resolves the signer of a request against its public key on the ledger.
pub struct LedgerSignatureVerifier {
    ledger: Arc<dyn Ledger>,
    max_skew_secs: u64,
}

impl LedgerSignatureVerifier {
    pub fn new(ledger: Arc<dyn Ledger>, max_skew_secs: u64) -> Self {
        Self {
            ledger,
            max_skew_secs,
        }
    }
}

fn unauthorized(msg: &str) -> PowerError {
    PowerError::Unauthorized(msg.to_string())
}

#[async_trait]
impl RequestVerifier for LedgerSignatureVerifier {
    async fn verify_and_identify(&self, request: &InboundRequest) -> Result<NodeId> {
        let signer: u32 = request
            .signer
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| unauthorized("missing or malformed signer"))?;
        let timestamp: u64 = request
            .timestamp
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| unauthorized("missing or malformed timestamp"))?;
        let signature = request
            .signature
            .as_deref()
            .ok_or_else(|| unauthorized("missing signature"))?;

        if unix_now().abs_diff(timestamp) > self.max_skew_secs {
            return Err(unauthorized("request timestamp outside accepted window"));
        }

        let record = match self.ledger.get_node(NodeId(signer)).await {
            Ok(record) => record,
            Err(PowerError::Validation(_)) => return Err(unauthorized("unknown signer")),
            Err(e) => return Err(e),
        };

        if !signed::verify_request(
            &request.method,
            &request.path,
            timestamp,
            &request.body,
            signature,
            &record.public_key,
        ) {
            return Err(unauthorized("invalid signature"));
        }

        Ok(record.id)
    }
}
