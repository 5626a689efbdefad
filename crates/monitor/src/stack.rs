//! Initiator stack trimming.
//!
//! Snapshots are trimmed once, when they are cached as candidates, and are
//! never re-trimmed afterwards.

use tabscope_core::config::NetworkConfig;
use tabscope_core::event::{AsyncStackLevel, StackFrame, StackSnapshot};
use tabscope_core::truncate_chars;

use crate::protocol::{CallFrame, StackTrace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimits {
    pub max_frames_per_level: usize,
    pub max_async_levels: usize,
    pub max_function_name_chars: usize,
    pub max_url_chars: usize,
}

impl Default for StackLimits {
    fn default() -> Self {
        Self {
            max_frames_per_level: 30,
            max_async_levels: 15,
            max_function_name_chars: 150,
            max_url_chars: 300,
        }
    }
}

impl From<&NetworkConfig> for StackLimits {
    fn from(cfg: &NetworkConfig) -> Self {
        Self {
            max_frames_per_level: cfg.max_frames_per_level,
            max_async_levels: cfg.max_async_levels,
            max_function_name_chars: cfg.max_function_name_chars,
            max_url_chars: cfg.max_url_chars,
        }
    }
}

/// Copy the innermost chain and up to `max_async_levels` parent chains,
/// keeping at most `max_frames_per_level` frames of each.
pub fn trim_stack_trace(trace: &StackTrace, limits: &StackLimits) -> StackSnapshot {
    let mut truncated = false;

    let frames = trim_frames(&trace.call_frames, limits, &mut truncated);

    let mut async_frames = Vec::new();
    let mut parent = trace.parent.as_deref();
    while let Some(level) = parent {
        if async_frames.len() == limits.max_async_levels {
            truncated = true;
            break;
        }
        async_frames.push(AsyncStackLevel {
            description: level.description.clone(),
            frames: trim_frames(&level.call_frames, limits, &mut truncated),
        });
        parent = level.parent.as_deref();
    }

    StackSnapshot {
        frames,
        async_frames,
        truncated,
    }
}

fn trim_frames(
    frames: &[CallFrame],
    limits: &StackLimits,
    truncated: &mut bool,
) -> Vec<StackFrame> {
    if frames.len() > limits.max_frames_per_level {
        *truncated = true;
    }
    frames
        .iter()
        .take(limits.max_frames_per_level)
        .map(|f| StackFrame {
            function_name: truncate_chars(&f.function_name, limits.max_function_name_chars),
            url: truncate_chars(&f.url, limits.max_url_chars),
            line_number: f.line_number,
            column_number: f.column_number,
            script_id: f.script_id.clone(),
        })
        .collect()
}
