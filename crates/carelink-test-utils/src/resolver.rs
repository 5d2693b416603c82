// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-answer resolver double for pipeline tests.

use async_trait::async_trait;

use carelink_core::types::Resolution;
use carelink_core::{CarelinkError, ResolveIdentity, Session};

enum Answer {
    Resolved(Resolution),
    Failing(String),
}

pub struct FixedResolver {
    answer: Answer,
}

impl FixedResolver {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            answer: Answer::Resolved(resolution),
        }
    }

    /// A resolver that always fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            answer: Answer::Failing(message.to_string()),
        }
    }
}

#[async_trait]
impl ResolveIdentity for FixedResolver {
    async fn resolve(&self, _session: &Session) -> Result<Resolution, CarelinkError> {
        match &self.answer {
            Answer::Resolved(resolution) => Ok(resolution.clone()),
            Answer::Failing(message) => Err(CarelinkError::Internal(message.clone())),
        }
    }
}
