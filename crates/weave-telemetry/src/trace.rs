//! W3C Trace Context 的 `traceparent` 头。
//!
//! 格式：`00-<32 位十六进制 trace-id>-<16 位十六进制 parent-id>-<2 位十六进制 flags>`。
//! 全零的 trace-id 或 parent-id 视为无效。

use std::fmt;

use rand::Rng;

/// 调用上下文中承载追踪信息的键。
pub const TRACEPARENT: &str = "traceparent";

const VERSION: &str = "00";
const SAMPLED: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
    flags: u8,
}

impl TraceContext {
    /// 新建根上下文，默认采样。
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: non_zero(&mut rng),
            span_id: non_zero(&mut rng),
            flags: SAMPLED,
        }
    }

    /// 同一 trace 下的子 span。
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: non_zero(&mut rand::thread_rng()),
            flags: self.flags,
        }
    }

    /// 解析 `traceparent`，任何格式问题都返回 `None`。
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != VERSION {
            return None;
        }
        let trace_id: [u8; 16] = decode(trace_id)?;
        let span_id: [u8; 8] = decode(span_id)?;
        let [flags] = decode::<1>(flags)?;
        if trace_id == [0; 16] || span_id == [0; 8] {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }

    pub fn trace_id(&self) -> String {
        encode(&self.trace_id)
    }

    pub fn span_id(&self) -> String {
        encode(&self.span_id)
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED == SAMPLED
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERSION}-{}-{}-{:02x}",
            encode(&self.trace_id),
            encode(&self.span_id),
            self.flags
        )
    }
}

fn non_zero<const N: usize, R: Rng>(rng: &mut R) -> [u8; N] {
    let mut bytes = [0u8; N];
    while bytes == [0u8; N] {
        rng.fill(&mut bytes[..]);
    }
    bytes
}

fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn decode<const N: usize>(raw: &str) -> Option<[u8; N]> {
    if raw.len() != N * 2 || !raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let mut bytes = [0u8; N];
    for (index, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&raw[index * 2..index * 2 + 2], 16).ok()?;
    }
    Some(bytes)
}
