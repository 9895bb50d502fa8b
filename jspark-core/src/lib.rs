// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Core in-process RPC runtime: per-endpoint inboxes enforcing FIFO, single-threaded
//! delivery; a dispatcher that schedules those inboxes onto a fixed worker pool; and
//! per-peer outboxes that serialize outbound traffic while a transport connection comes up
//! asynchronously.
//!
//! This crate owns none of the byte-level transport: connection establishment, frame
//! encoding and network I/O are all contracts in [`transport`] that a host application
//! implements. [`RpcEnvironment`] is the façade tying everything together; [`Endpoint`] is
//! the trait application code implements to receive messages.

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod inbox;
pub mod message;
pub mod outbox;
pub mod reference;
pub mod telemetry;
pub mod thread_pool;
pub mod transport;
pub mod verifier;

pub use address::RpcAddress;
pub use config::RpcEnvironmentConfig;
pub use endpoint::Endpoint;
pub use environment::RpcEnvironment;
pub use error::{RpcError, RpcResult};
pub use inbox::{Inbox, ProcessOutcome};
pub use message::{MailboxItem, ReplyContext, RequestMessage};
pub use outbox::{OutboxItem, TransportEvent};
pub use reference::{AskFuture, EndpointReference};
pub use transport::{Client, ClientFactory, Server, ServerFactory};
pub use verifier::VERIFIER_ENDPOINT_NAME;
