// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PASE round-trip state machine: mirrors the teacher's `LoginCtx`/
//! `LoginStates` shape (`state_machine/login/common.rs`), generalized from
//! iSCSI's plain/CHAP login branches to the fixed
//! Request→Response→Confirm→Verify round the PASE handshake always takes.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{HarnessError, Result},
    models::pase_wire::{PaseConfirm, PaseMessage, decode_pase_message, encode_pase_confirm},
    pase::handshake::PaseHandshake,
    session::Session,
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
};

/// Context threaded through every PASE round-trip step.
pub struct PaseCtx {
    pub session: Arc<Session>,
    pub deadline: Duration,
    pub handshake: PaseHandshake,
    pub session_key: Option<Vec<u8>>,
    pending_confirm: Option<PaseConfirm>,
    state: Option<PaseStates>,
}

impl PaseCtx {
    pub fn new(session: Arc<Session>, handshake: PaseHandshake, deadline: Duration) -> Self {
        Self {
            session,
            deadline,
            handshake,
            session_key: None,
            pending_confirm: None,
            state: Some(PaseStates::AwaitResponse(AwaitResponse)),
        }
    }
}

pub type PaseStepOut = Transition<PaseStates, Result<()>>;

#[derive(Debug)]
pub enum PaseStates {
    AwaitResponse(AwaitResponse),
    SendConfirm(SendConfirm),
    AwaitVerify(AwaitVerify),
}

#[derive(Debug)]
pub struct AwaitResponse;

impl StateMachine<PaseCtx, PaseStepOut> for AwaitResponse {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PaseStepOut> + Send + 'a>>
    where Self: 'a, PaseCtx: 'a;

    fn step<'a>(&'a mut self, ctx: &'a mut PaseCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            let raw = match ctx.session.read_frame_with_deadline(ctx.deadline).await {
                Ok(raw) => raw,
                Err(e) => return Transition::Done(Err(e)),
            };
            match decode_pase_message(&raw) {
                Ok(PaseMessage::Response(resp)) => {
                    match ctx.handshake.finish_and_confirm(&resp.public_value) {
                        Ok(confirm) => {
                            ctx.pending_confirm = Some(confirm);
                            Transition::Next(PaseStates::SendConfirm(SendConfirm), Ok(()))
                        },
                        Err(e) => Transition::Done(Err(e)),
                    }
                },
                Ok(PaseMessage::Error(e)) => Transition::Done(Err(e.into_harness_error())),
                Ok(other) => Transition::Done(Err(HarnessError::protocol(format!(
                    "unexpected PASE message awaiting response: {other:?}"
                )))),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

#[derive(Debug)]
pub struct SendConfirm;

impl StateMachine<PaseCtx, PaseStepOut> for SendConfirm {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PaseStepOut> + Send + 'a>>
    where Self: 'a, PaseCtx: 'a;

    fn step<'a>(&'a mut self, ctx: &'a mut PaseCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            let confirm = match ctx.pending_confirm.take() {
                Some(c) => c,
                None => {
                    return Transition::Done(Err(HarnessError::protocol(
                        "no confirm pending to send",
                    )));
                },
            };
            let payload = match encode_pase_confirm(&confirm) {
                Ok(p) => p,
                Err(e) => return Transition::Done(Err(e)),
            };
            match ctx.session.write_frame(&payload).await {
                Ok(()) => Transition::Next(PaseStates::AwaitVerify(AwaitVerify), Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

#[derive(Debug)]
pub struct AwaitVerify;

impl StateMachine<PaseCtx, PaseStepOut> for AwaitVerify {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = PaseStepOut> + Send + 'a>>
    where Self: 'a, PaseCtx: 'a;

    fn step<'a>(&'a mut self, ctx: &'a mut PaseCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            let raw = match ctx.session.read_frame_with_deadline(ctx.deadline).await {
                Ok(raw) => raw,
                Err(e) => return Transition::Done(Err(e)),
            };
            match decode_pase_message(&raw) {
                Ok(PaseMessage::Verify(v)) => {
                    match ctx.handshake.verify_and_derive_session_key(&v.verify) {
                        Ok(key) => {
                            ctx.session_key = Some(key);
                            Transition::Done(Ok(()))
                        },
                        Err(e) => Transition::Done(Err(e)),
                    }
                },
                Ok(PaseMessage::Error(e)) => Transition::Done(Err(e.into_harness_error())),
                Ok(other) => Transition::Done(Err(HarnessError::protocol(format!(
                    "unexpected PASE message awaiting verify: {other:?}"
                )))),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachineCtx<PaseCtx, ()> for PaseCtx {
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        debug!("running PASE round-trip state machine");
        loop {
            if cancel.is_cancelled() {
                return Err(HarnessError::infra("PASE handshake cancelled"));
            }
            let mut state = self
                .state
                .take()
                .ok_or_else(|| HarnessError::protocol("PASE state machine already completed"))?;
            let transition = match &mut state {
                PaseStates::AwaitResponse(s) => s.step(self).await,
                PaseStates::SendConfirm(s) => s.step(self).await,
                PaseStates::AwaitVerify(s) => s.step(self).await,
            };
            match transition {
                Transition::Next(next, _) => self.state = Some(next),
                Transition::Stay(Ok(())) => self.state = Some(state),
                Transition::Stay(Err(e)) => return Err(e),
                Transition::Done(r) => return r,
            }
        }
    }
}
