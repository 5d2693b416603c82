// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted identity-provider double.
//!
//! Replies are pushed in advance and consumed in order; call counters let
//! tests assert duplicate suppression actually prevented provider traffic.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use carelink_core::types::{
    DatasetKind, FetchOutcome, VerificationPoll, VerificationReply, VerificationRequest,
    VerifiedIdentity,
};
use carelink_core::{CarelinkError, IdentityProvider};

#[derive(Default)]
pub struct MockProvider {
    verification_replies: Mutex<VecDeque<Result<VerificationReply, CarelinkError>>>,
    poll_replies: Mutex<VecDeque<Result<VerificationPoll, CarelinkError>>>,
    fetch_replies: Mutex<VecDeque<Result<FetchOutcome, CarelinkError>>>,
    verification_count: AtomicUsize,
    poll_count: AtomicUsize,
    fetch_count: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_verification(&self, reply: Result<VerificationReply, CarelinkError>) {
        self.verification_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_poll(&self, reply: Result<VerificationPoll, CarelinkError>) {
        self.poll_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_fetch(&self, reply: Result<FetchOutcome, CarelinkError>) {
        self.fetch_replies.lock().unwrap().push_back(reply);
    }

    pub fn verification_calls(&self) -> usize {
        self.verification_count.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn unscripted(operation: &str) -> CarelinkError {
        CarelinkError::Internal(format!("mock provider: no scripted reply for {operation}"))
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn request_verification(
        &self,
        _request: &VerificationRequest,
    ) -> Result<VerificationReply, CarelinkError> {
        self.verification_count.fetch_add(1, Ordering::SeqCst);
        self.verification_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("request_verification")))
    }

    async fn check_verification(
        &self,
        _correlation_id: &str,
    ) -> Result<VerificationPoll, CarelinkError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.poll_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("check_verification")))
    }

    async fn fetch_dataset(
        &self,
        _kind: DatasetKind,
        _identity: &VerifiedIdentity,
    ) -> Result<FetchOutcome, CarelinkError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetch_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("fetch_dataset")))
    }
}
