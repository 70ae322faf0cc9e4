//! Flow stepping
//!
//! A chain's flow is a boxed future. The runner advances it with [`step`],
//! which polls it exactly once with a no-op waker; a suspension helper
//! deposits its [`ControlToken`] in the chain and returns `Pending`, which
//! ends the step.

use crate::chain::Chain;
use crate::error::{TaskError, TaskResult};
use crate::token::ControlToken;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A chain's whole routine, owned by whichever context runs its next step
pub(crate) type BoxFlow = Pin<Box<dyn Future<Output = TaskResult<()>> + Send>>;

/// Future that stops the flow once, handing `token` to the runner
pub(crate) struct Suspend<'a> {
    chain: &'a Chain,
    token: Option<ControlToken>,
}

impl<'a> Suspend<'a> {
    pub fn new(chain: &'a Chain, token: ControlToken) -> Self {
        Self {
            chain,
            token: Some(token),
        }
    }
}

impl Future for Suspend<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        match self.token.take() {
            Some(token) => {
                self.chain.deposit(token);
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Run the flow up to its next suspension point
pub(crate) fn step(flow: &mut BoxFlow, chain: &Chain) -> ControlToken {
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);

    match panic::catch_unwind(AssertUnwindSafe(|| flow.as_mut().poll(&mut cx))) {
        Ok(Poll::Ready(Ok(()))) => {
            chain.clear_token();
            ControlToken::Finished
        }
        Ok(Poll::Ready(Err(e))) => {
            chain.clear_token();
            ControlToken::Failed(e)
        }
        Ok(Poll::Pending) => chain.take_token().unwrap_or_else(ControlToken::Failed),
        Err(payload) => {
            chain.clear_token();
            ControlToken::Failed(TaskError::from_panic(payload))
        }
    }
}
