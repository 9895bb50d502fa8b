// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The built-in verifier endpoint: every environment registers one of
//! these under a reserved name at start-up, answering "is a name registered here?" probes
//! from peers that have only ever heard about an endpoint second-hand (e.g. a reference
//! deserialized out of band, or one handed off by a third party) and want to confirm it's
//! real before spending a round trip on it.

use std::sync::{Arc, Weak};

use crate::{address::RpcAddress, endpoint::Endpoint, environment::EnvironmentInner, message::ReplyContext};

/// Reserved endpoint name. [`crate::environment::RpcEnvironment::register`] rejects any
/// caller-supplied name equal to this.
pub const VERIFIER_ENDPOINT_NAME: &str = "__jspark_verifier__";

pub(crate) struct Verifier {
    env: Weak<EnvironmentInner>,
}

impl Verifier {
    pub(crate) fn new(env: Weak<EnvironmentInner>) -> Self {
        Self { env }
    }
}

impl Endpoint for Verifier {
    fn receive(&mut self, _sender_addr: &RpcAddress, _payload: Vec<u8>) {
        // The verifier only answers request/response probes; a one-way message to it is
        // not part of the protocol and is simply ignored.
    }

    fn receive_and_reply(&mut self, _sender_addr: &RpcAddress, payload: Vec<u8>, reply_ctx: ReplyContext) {
        let exists = match (self.env.upgrade(), String::from_utf8(payload)) {
            (Some(env), Ok(name)) => env.dispatcher().is_registered(&name),
            _ => false,
        };
        reply_ctx.reply(vec![u8::from(exists)]);
    }
}
