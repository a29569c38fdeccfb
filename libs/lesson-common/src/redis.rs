use crate::types::{AppState, LessonEvent, ProjectConfig, RunRequest, TestState};
use chrono::Utc;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Redis key scheme shared by the API and the worker.
/// Keys are deterministic so both sides agree without coordination.

pub const QUEUE_KEY: &str = "lessonrun:queue";
pub const CANCEL_PREFIX: &str = "lessonrun:cancel";
pub const PROJECT_PREFIX: &str = "lessonrun:project";
pub const TESTS_PREFIX: &str = "lessonrun:tests";
pub const EVENTS_PREFIX: &str = "lessonrun:events";
pub const STATE_KEY: &str = "lessonrun:state";

pub fn cancel_key(project_id: &str) -> String {
    format!("{}:{}", CANCEL_PREFIX, project_id)
}

pub fn project_key(project_id: &str) -> String {
    format!("{}:{}", PROJECT_PREFIX, project_id)
}

pub fn tests_key(project_id: &str) -> String {
    format!("{}:{}", TESTS_PREFIX, project_id)
}

pub fn events_channel(project_id: &str) -> String {
    format!("{}:{}", EVENTS_PREFIX, project_id)
}

fn encode<T: Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })
}

fn decode<T: DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
    })
}

async fn get_json<T: DeserializeOwned>(
    conn: &mut redis::aio::ConnectionManager,
    key: &str,
) -> RedisResult<Option<T>> {
    let payload: Option<String> = conn.get(key).await?;
    payload.as_deref().map(|p| decode(p)).transpose()
}

/// Queue a run request (RPUSH for FIFO semantics)
pub async fn push_run(
    conn: &mut redis::aio::ConnectionManager,
    request: &RunRequest,
) -> RedisResult<()> {
    let payload = encode(request)?;
    let _: () = conn.rpush(QUEUE_KEY, payload).await?;
    Ok(())
}

/// Pop the next run request, BLPOP with timeout so callers can observe shutdown
pub async fn pop_run(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<RunRequest>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}

/// Flag the live run of a project for cancellation.
/// The flag holds the request time in epoch milliseconds.
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
) -> RedisResult<()> {
    // One hour TTL: longer than any realistic run
    let requested_ms = Utc::now().timestamp_millis();
    let _: () = conn.set_ex(cancel_key(project_id), requested_ms, 3600).await?;
    Ok(())
}

/// A flag raised before `request` was queued belongs to an earlier run.
/// Unreadable flags count as stale.
pub fn is_stale_cancel(flag: &str, request: &RunRequest) -> bool {
    match flag.parse::<i64>() {
        Ok(requested_ms) => requested_ms < request.requested_at.timestamp_millis(),
        Err(_) => true,
    }
}

/// Drop a cancel flag left over from an earlier run of the project.
/// A cancel raised after `request` was queued is kept. Returns true if a flag was dropped.
pub async fn clear_stale_cancel(
    conn: &mut redis::aio::ConnectionManager,
    request: &RunRequest,
) -> RedisResult<bool> {
    let key = cancel_key(&request.project_id);
    let flag: Option<String> = conn.get(&key).await?;
    match flag {
        Some(flag) if is_stale_cancel(&flag, request) => {
            let _: i64 = conn.del(&key).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Consume a pending cancellation flag. Returns true if one was set.
pub async fn take_cancel(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
) -> RedisResult<bool> {
    let deleted: i64 = conn.del(cancel_key(project_id)).await?;
    Ok(deleted > 0)
}

pub async fn get_project_config(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
) -> RedisResult<Option<ProjectConfig>> {
    get_json(conn, &project_key(project_id)).await
}

pub async fn set_project_config(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
    config: &ProjectConfig,
) -> RedisResult<()> {
    let payload = encode(config)?;
    let _: () = conn.set(project_key(project_id), payload).await?;
    Ok(())
}

pub async fn get_app_state(
    conn: &mut redis::aio::ConnectionManager,
) -> RedisResult<Option<AppState>> {
    get_json(conn, STATE_KEY).await
}

pub async fn set_app_state(
    conn: &mut redis::aio::ConnectionManager,
    state: &AppState,
) -> RedisResult<()> {
    let payload = encode(state)?;
    let _: () = conn.set(STATE_KEY, payload).await?;
    Ok(())
}

/// Store the latest test list of a project for polling clients
pub async fn store_tests(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
    tests: &[TestState],
) -> RedisResult<()> {
    let payload = encode(&tests)?;
    let _: () = conn.set(tests_key(project_id), payload).await?;
    Ok(())
}

pub async fn get_tests(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
) -> RedisResult<Option<Vec<TestState>>> {
    get_json(conn, &tests_key(project_id)).await
}

/// Broadcast a UI event on the project's channel
pub async fn publish_event(
    conn: &mut redis::aio::ConnectionManager,
    project_id: &str,
    event: &LessonEvent,
) -> RedisResult<()> {
    let payload = encode(event)?;
    let _: i64 = conn.publish(events_channel(project_id), payload).await?;
    Ok(())
}
