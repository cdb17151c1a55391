// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared state-machine scaffolding: a `Transition` a step may return, the
//! per-state `step` trait, and the context-level `execute` driver loop.
//!
//! `StateMachineCtx` is defined here alongside `StateMachine`; both are
//! needed by every multi-round exchange (the PASE handshake being the one
//! this crate actually drives with it).

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

pub trait StateMachine<Ctx, RespCtx>: Sized {
    type StepResult<'a>: Future<Output = RespCtx> + Send + 'a
    where
        Self: 'a,
        RespCtx: 'a,
        Ctx: 'a;

    fn step<'a>(&'a mut self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

/// Drives a context's own state enum to completion, honoring cancellation
/// between steps. Each implementor owns its state enum and dispatches
/// `step` on it; `execute` is the `loop { match state.step(self) { ... } }`
/// shape the teacher's `LoginCtx` hand-writes per context.
pub trait StateMachineCtx<Ctx, RespCtx> {
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<RespCtx>;
}
