//! Streaming HTML state-machine parsing framework.
//!
//! Every site adapter expresses its page grammar the same way: while
//! scanning the token stream it is in some state; seeing a tag or a run of
//! text may transition it to another state and/or extract a field. The
//! state lives in an explicit stack so nested repeating structures (a list
//! of screenings, each with a nested location block) can return to whatever
//! state enclosed them. Unrecognized markup is ignored by design; festival
//! sites change markup between runs without notice, and silence plus the
//! run counters is the contract for drift.

pub mod tokenizer;

use std::fmt::Debug;

use tracing::debug;

pub use tokenizer::{decode_entities, normalize_ws, Tag, Token};

/// Explicit parse-state stack.
///
/// `push` enters a nested context, `pop` returns to the enclosing one,
/// `change` replaces the current state in place. A flat state variable
/// cannot express "return to whichever state I was in before this block",
/// which festival pages require at arbitrary depth.
#[derive(Debug)]
pub struct StateStack<S> {
    stack: Vec<S>,
}

impl<S: Copy + PartialEq + Debug> StateStack<S> {
    pub fn new(initial: S) -> Self {
        Self {
            stack: vec![initial],
        }
    }

    pub fn current(&self) -> S {
        *self.stack.last().expect("state stack is never empty")
    }

    pub fn is_at(&self, state: S) -> bool {
        self.current() == state
    }

    pub fn push(&mut self, state: S) {
        self.stack.push(state);
    }

    /// Return to the enclosing state. Popping the initial state is markup
    /// drift (a close tag we never saw opened); it is ignored.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        } else {
            debug!(target: "page_parse", "pop on initial state ignored");
        }
    }

    pub fn pop_n(&mut self, n: usize) {
        for _ in 0..n {
            self.pop();
        }
    }

    pub fn change(&mut self, state: S) {
        *self.stack.last_mut().expect("state stack is never empty") = state;
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Callbacks a concrete page grammar supplies.
///
/// Handlers read the current state and the incoming token, then extract a
/// value, call into the identity registry, move the stack, or do nothing.
/// Doing nothing is the common case; pages contain far more tags than are
/// semantically relevant.
pub trait PageHandler {
    type State: Copy + PartialEq + Debug;

    fn on_open_tag(&mut self, stack: &mut StateStack<Self::State>, tag: &Tag);
    fn on_close_tag(&mut self, stack: &mut StateStack<Self::State>, name: &str);
    fn on_text(&mut self, stack: &mut StateStack<Self::State>, text: &str);
}

/// Drives one handler over one document.
pub struct PageParser<H: PageHandler> {
    /// Short adapter prefix for the debug trace channel.
    prefix: &'static str,
    stack: StateStack<H::State>,
    handler: H,
}

impl<H: PageHandler> PageParser<H> {
    pub fn new(prefix: &'static str, initial_state: H::State, handler: H) -> Self {
        Self {
            prefix,
            stack: StateStack::new(initial_state),
            handler,
        }
    }

    /// Consume a whole document: one pass, every token dispatched once.
    ///
    /// Each dispatch is mirrored to the `page_parse` debug target; when a
    /// site's markup drifts and extraction silently stops working, diffing
    /// two of these traces is how the break is found.
    pub fn feed(&mut self, html: &str) {
        for token in tokenizer::tokenize(html) {
            debug!(
                target: "page_parse",
                "[{}] {:?} {:?}",
                self.prefix,
                self.stack.current(),
                token
            );
            match token {
                Token::Open(tag) => self.handler.on_open_tag(&mut self.stack, &tag),
                Token::Close { name } => self.handler.on_close_tag(&mut self.stack, &name),
                Token::Text(text) => self.handler.on_text(&mut self.stack, &text),
                // Comments and declarations carry no festival data
                Token::Comment(_) | Token::Declaration(_) => {}
            }
        }
    }

    pub fn state(&self) -> H::State {
        self.stack.current()
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}
