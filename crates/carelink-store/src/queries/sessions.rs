// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session document CRUD plus the atomic read-modify-write.
//!
//! Every read filters on `expires_at` so expired sessions behave as
//! not-found without waiting for the reaper.

use carelink_core::traits::session_store::MutateFn;
use carelink_core::types::Session;
use carelink_core::CarelinkError;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::{map_call_err, map_tr_err, sql_err, Database};

fn serialize_doc(session: &Session) -> Result<String, CarelinkError> {
    serde_json::to_string(session).map_err(|e| CarelinkError::Storage {
        source: Box::new(e),
    })
}

fn deserialize_doc(doc: &str) -> Result<Session, CarelinkError> {
    serde_json::from_str(doc).map_err(|e| CarelinkError::Storage {
        source: Box::new(e),
    })
}

/// Insert a freshly created session document.
pub async fn insert(db: &Database, session: &Session) -> Result<(), CarelinkError> {
    let session = session.clone();
    db.connection()
        .call(move |conn| {
            let doc = serialize_doc(&session)?;
            conn.execute(
                "INSERT INTO sessions
                     (session_id, campaign_order_id, document, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.session_id,
                    session.external_links.campaign_order_id,
                    doc,
                    session.expires_at.to_rfc3339(),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
        .map_err(map_call_err)
}

/// Get a live session by id. Expired or unknown ids return `None`.
pub async fn get(
    db: &Database,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Session>, CarelinkError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let doc: Option<String> = conn
                .query_row(
                    "SELECT document FROM sessions
                     WHERE session_id = ?1 AND expires_at > ?2",
                    params![session_id, now.to_rfc3339()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;
            match doc {
                Some(doc) => Ok(Some(deserialize_doc(&doc)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_call_err)
}

/// Atomically read, mutate, and write back a session document.
///
/// The closure runs on the single connection thread between the row read
/// and the row write, so concurrent mutators serialize here. A closure
/// error aborts without writing.
pub async fn mutate(
    db: &Database,
    session_id: &str,
    f: MutateFn,
    now: DateTime<Utc>,
) -> Result<Session, CarelinkError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let doc: Option<String> = tx
                .query_row(
                    "SELECT document FROM sessions
                     WHERE session_id = ?1 AND expires_at > ?2",
                    params![session_id, now.to_rfc3339()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;
            let Some(doc) = doc else {
                return Err(CarelinkError::NotFound { session_id });
            };
            let mut session = deserialize_doc(&doc)?;
            f(&mut session)?;
            session.updated_at = Utc::now();
            let doc = serialize_doc(&session)?;
            tx.execute(
                "UPDATE sessions
                 SET campaign_order_id = ?2, document = ?3, expires_at = ?4, updated_at = ?5
                 WHERE session_id = ?1",
                params![
                    session.session_id,
                    session.external_links.campaign_order_id,
                    doc,
                    session.expires_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(session)
        })
        .await
        .map_err(map_call_err)
}

/// Delete a session. Unknown ids are not an error.
pub async fn delete(db: &Database, session_id: &str) -> Result<(), CarelinkError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Remove all expired sessions, returning how many were reaped.
pub async fn purge_expired(db: &Database, now: DateTime<Utc>) -> Result<u64, CarelinkError> {
    db.connection()
        .call(move |conn| {
            let reaped = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![now.to_rfc3339()],
            )?;
            Ok(reaped as u64)
        })
        .await
        .map_err(map_tr_err)
}

/// Find the most recently touched live session linked to a campaign order.
pub async fn find_by_campaign_order(
    db: &Database,
    order_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Session>, CarelinkError> {
    let order_id = order_id.to_string();
    db.connection()
        .call(move |conn| {
            let doc: Option<String> = conn
                .query_row(
                    "SELECT document FROM sessions
                     WHERE campaign_order_id = ?1 AND expires_at > ?2
                     ORDER BY updated_at DESC LIMIT 1",
                    params![order_id, now.to_rfc3339()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;
            match doc {
                Some(doc) => Ok(Some(deserialize_doc(&doc)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_call_err)
}
