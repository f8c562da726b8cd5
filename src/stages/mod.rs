//! The two model calls of a generation run, each split into a request
//! builder and a reply parser so they can be driven against any `Transport`.

pub mod locate;
pub mod synthesis;

use crate::{
    error::Result,
    gemini::{Transport, UpstreamReply, UpstreamRequest},
    logger,
};
use serde_json::Value;

pub use locate::{LocateInput, LocateStage};
pub use synthesis::{png_size, SynthesisInput, SynthesisStage};

pub trait Stage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn build(&self, input: &Self::Input) -> UpstreamRequest;

    fn parse(&self, reply: UpstreamReply) -> Result<Self::Output>;
}

/// One request, one reply, no retry.
pub async fn run_stage<S>(stage: &S, transport: &dyn Transport, input: &S::Input) -> Result<S::Output>
where
    S: Stage + Sync,
    S::Input: Sync,
{
    let request = stage.build(input);
    let _timer = logger::timer(stage.name());
    let reply = transport.call(request).await?;
    stage.parse(reply)
}

/// Pulls a JSON value out of free-form model text: the first fenced block if
/// any, then the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = fenced_block(trimmed).unwrap_or(trimmed);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&candidate[start..=end]).ok()
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let mut rest = &text[open + 3..];
    if rest
        .get(..4)
        .map_or(false, |tag| tag.eq_ignore_ascii_case("json"))
    {
        rest = &rest[4..];
    }
    let close = rest.find("```")?;
    Some(rest[..close].trim())
}
