//! Interpreter for the endpoint protocol hooks.
//!
//! [`apply_object`] is the single entry point the engine uses per object:
//! it resolves the method definition, runs the before hook (which may
//! rewrite or short-circuit the request), performs the call and folds the
//! after hooks over the result. The final HTTP-code check runs unless a
//! hook already settled the outcome.

use std::time::Duration;

use provost_core::object::{self, Object};
use provost_core::{ProvostError, ProvostResult};
use tracing::{debug, warn};

use crate::client::{check_http_code, ApplyResult, Client};
use crate::endpoints::{
    object_endpoints, AfterHook, BeforeHook, MethodDefinition, ObjectEndpoints, Verb,
};

/// Attempt cap shared by every polling hook; doubles as the timeout.
const MAX_POLL_ATTEMPTS: u32 = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Applies `verb` to `object` against the cluster behind `client`,
/// running the full before/after protocol of the object's Kind.
pub async fn apply_object(
    client: &Client,
    verb: Verb,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<ApplyResult> {
    let kind = object::get_kind(object);
    let endpoints = object_endpoints(kind)?;
    let method = endpoints.method(verb)?;

    let effective = match method.before {
        BeforeHook::None => method,
        BeforeHook::GetObjectAndMerge => {
            get_object_and_merge(client, endpoints, method, object, force_master_token).await?
        }
        BeforeHook::FailIfAlreadyExists => {
            fail_if_already_exists(client, endpoints, object).await?;
            method
        }
        BeforeHook::WaitUntilIsRemoved => {
            return wait_until_is_removed(client, endpoints, object, force_master_token).await;
        }
    };

    let result = client.perform(effective, object, force_master_token).await?;
    run_after_hooks(client, endpoints, effective, object, force_master_token, result).await
}

async fn run_after_hooks(
    client: &Client,
    endpoints: &ObjectEndpoints,
    method: &MethodDefinition,
    object: &Object,
    force_master_token: bool,
    mut result: ApplyResult,
) -> ProvostResult<ApplyResult> {
    for hook in &method.after {
        match hook {
            AfterHook::IgnoreWhenDoesNotExistOrConflicts => {
                if result.status == 404 || result.status == 409 {
                    debug!(
                        verb = %method.verb,
                        url = %result.url,
                        status = result.status,
                        "object is already absent or contended, treating as success"
                    );
                    return Ok(result);
                }
            }
            AfterHook::WhenConflictThenDeleteAndRedo => {
                if result.status == 409 {
                    result = delete_and_redo(
                        client,
                        endpoints,
                        method,
                        object,
                        force_master_token,
                    )
                    .await?;
                }
            }
            AfterHook::GetObject => {
                check_http_code(&result)?;
                poll_until_active(client, endpoints, method, object, force_master_token).await?;
            }
            AfterHook::TryToWaitUntilIsGone => {
                check_http_code(&result)?;
                poll_until_gone(client, endpoints, object, force_master_token).await?;
            }
        }
    }
    check_http_code(&result)?;
    Ok(result)
}

/// PATCH before-hook: GET the live object, poll while it reports a
/// terminating phase, and turn the call into a POST when it is absent.
/// The candidate object is sent as-is — its labels already carry the
/// target versions.
async fn get_object_and_merge<'e>(
    client: &Client,
    endpoints: &'e ObjectEndpoints,
    method: &'e MethodDefinition,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<&'e MethodDefinition> {
    let get = endpoints.method(Verb::Get)?;
    for _ in 0..MAX_POLL_ATTEMPTS {
        let result = client.perform(get, object, force_master_token).await?;
        if result.status == 404 {
            return endpoints.method(Verb::Post);
        }
        check_http_code(&result)?;
        let live = result.parse_object()?;
        if !object::is_terminating(&live) {
            return Ok(method);
        }
        debug!(url = %result.url, "live object is terminating, waiting before patching");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(ProvostError::Timeout(format!(
        "object {} stayed in a terminating phase for {MAX_POLL_ATTEMPTS} attempts",
        object::get_name(object)
    )))
}

/// ProjectRequest POST before-hook: a pre-existing project means the base
/// name is taken and the caller has to pick a new one.
async fn fail_if_already_exists(
    client: &Client,
    endpoints: &ObjectEndpoints,
    object: &Object,
) -> ProvostResult<()> {
    let get = endpoints.method(Verb::Get)?;
    let result = client.perform(get, object, true).await?;
    match result.status {
        404 | 403 => Ok(()),
        status if (200..300).contains(&status) => Err(ProvostError::AlreadyExists {
            entity: format!("project {}", object::get_name(object)),
        }),
        _ => {
            check_http_code(&result)?;
            Ok(())
        }
    }
}

/// POST after-hook for 409: remove the offender, wait for the removal to
/// take, redo the request once. A second conflict is fatal.
async fn delete_and_redo(
    client: &Client,
    endpoints: &ObjectEndpoints,
    method: &MethodDefinition,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<ApplyResult> {
    let delete = endpoints.method(Verb::Delete)?;
    let deleted = client.perform(delete, object, force_master_token).await?;
    if !deleted.is_success() {
        return Err(ProvostError::internal(format!(
            "delete request failed while removing an object because of a conflict: {}",
            check_http_code(&deleted).unwrap_err()
        )));
    }

    // Wait until the removal is observable before redoing the request.
    let get = endpoints.method(Verb::Get)?;
    for _ in 0..MAX_POLL_ATTEMPTS {
        let result = client.perform(get, object, force_master_token).await?;
        if !result.is_success() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let redone = client.perform(method, object, force_master_token).await?;
    if redone.status == 409 {
        return Err(ProvostError::Conflict(format!(
            "redoing an action {} failed after the object was successfully removed \
             because of a previous conflict: {}",
            method.verb,
            check_http_code(&redone).unwrap_err()
        )));
    }
    Ok(redone)
}

/// POST after-hook: poll the created object until it reports an `Active`
/// phase.
async fn poll_until_active(
    client: &Client,
    endpoints: &ObjectEndpoints,
    method: &MethodDefinition,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<()> {
    let get = endpoints.method(Verb::Get)?;
    for attempt in 1..=MAX_POLL_ATTEMPTS {
        let result = client.perform(get, object, force_master_token).await?;
        if result.is_success() {
            if let Ok(live) = result.parse_object() {
                if object::get_status_phase(&live) == Some("Active") {
                    return Ok(());
                }
            }
        }
        if attempt < MAX_POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
    Err(ProvostError::Timeout(format!(
        "unable to finish the action {} on the object {}: there were {MAX_POLL_ATTEMPTS} \
         unsuccessful retries to get the created object from the cluster {}",
        method.verb,
        object::get_name(object),
        client.master_url()
    )))
}

/// DELETE after-hook: poll until the object reports terminating or the
/// GET answers 404/403.
async fn poll_until_gone(
    client: &Client,
    endpoints: &ObjectEndpoints,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<()> {
    let get = endpoints.method(Verb::Get)?;
    for _ in 0..MAX_POLL_ATTEMPTS {
        let result = client.perform(get, object, force_master_token).await?;
        if result.status == 404 || result.status == 403 {
            return Ok(());
        }
        check_http_code(&result)?;
        if result
            .parse_object()
            .map(|live| object::is_terminating(&live))
            .unwrap_or(false)
        {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(ProvostError::Timeout(format!(
        "object {} was not removed from the cluster within {MAX_POLL_ATTEMPTS} attempts",
        object::get_name(object)
    )))
}

/// The ENSURE_DELETION pseudo-verb: only polls GET until the object is
/// gone; kinds the cluster does not expose (404/403) count as removed.
async fn wait_until_is_removed(
    client: &Client,
    endpoints: &ObjectEndpoints,
    object: &Object,
    force_master_token: bool,
) -> ProvostResult<ApplyResult> {
    let get = endpoints.method(Verb::Get)?;
    let mut last_url = String::new();
    for _ in 0..MAX_POLL_ATTEMPTS {
        let result = client.perform(get, object, force_master_token).await?;
        last_url = result.url.clone();
        if result.status == 404 || result.status == 403 {
            return Ok(ApplyResult {
                verb: Verb::EnsureDeletion,
                url: result.url,
                status: 200,
                body: Vec::new(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    warn!(url = %last_url, "object still present after the deletion-polling budget");
    Err(ProvostError::Timeout(format!(
        "object {} still exists after {MAX_POLL_ATTEMPTS} removal checks",
        object::get_name(object)
    )))
}
