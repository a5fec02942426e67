use regcheck_oracle::{Oracle, OracleError};
use regcheck_protocol::AttachmentRef;
use regcheck_recovery::{recover_candidate, validate, ResponseSchema, Validated};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// Send, recover, validate; on failure ask for exactly one repair and validate that.
///
/// A repair that still does not validate surfaces as `MalformedResponse` with a preview of the
/// repaired text.
pub async fn generate_structured<T: DeserializeOwned + Send>(
    oracle: &dyn Oracle,
    prompt_parts: &[String],
    attachments: &[AttachmentRef],
    schema: &ResponseSchema,
    cancel: &CancellationToken,
) -> Result<Validated<T>, OracleError> {
    let raw = oracle
        .send(prompt_parts, attachments, &schema.json_schema, cancel)
        .await?;

    let reason = match validate::<T>(&recover_candidate(&raw), schema) {
        Ok(validated) => return Ok(validated),
        Err(repair) => repair.reason,
    };
    log::warn!(
        "oracle output failed validation ({reason}); requesting one repair ({} chars)",
        raw.len()
    );

    let repaired = oracle.repair(&raw, &schema.json_schema, cancel).await?;
    validate::<T>(&recover_candidate(&repaired), schema).map_err(|repair| {
        log::error!("repaired output still invalid: {}", repair.reason);
        OracleError::malformed(&repaired)
    })
}
