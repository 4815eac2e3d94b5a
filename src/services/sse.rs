use serde::Deserialize;
use tracing::debug;

/// SSE 事件 (仅解码与 usage 统计相关的字段)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },
    #[serde(rename = "message_delta")]
    MessageDelta { usage: DeltaUsage },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStart {
    #[serde(default)]
    pub usage: StartUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartUsage {
    #[serde(default)]
    pub input_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaUsage {
    #[serde(default)]
    pub output_tokens: u64,
}

/// SSE 流式 token 统计累加器
///
/// 单请求独占，逐块喂入原始字节。跨块拆分的行保留在尾部缓冲区，
/// 待后续块补全后再解析；任何畸形输入只会被跳过，不会中断解析。
///
/// 语义规则:
/// - `message_start` 的 input_tokens 是快照，后出现的值覆盖之前的值
/// - `message_delta` 的 output_tokens 是增量，必须累加
#[derive(Debug, Default)]
pub struct SseAccumulator {
    input_tokens: u64,
    output_tokens: u64,
    buffer: Vec<u8>,
}

impl SseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个原始字节块，处理其中所有完整的行
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        // 拆出所有以换行符结束的完整行，尾部不完整段留作下次的缓冲
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            self.process_line(line.trim_end_matches('\r'));
        }
    }

    /// 当前累计值 (input_tokens, output_tokens)
    pub fn tally(&self) -> (u64, u64) {
        (self.input_tokens, self.output_tokens)
    }

    fn process_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data: ") else {
            // 空行、event: 行、注释等都不参与统计
            return;
        };

        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(StreamEvent::MessageStart { message }) => {
                // 快照值: 覆盖而非累加
                self.input_tokens = message.usage.input_tokens;
            }
            Ok(StreamEvent::MessageDelta { usage }) => {
                // 增量值: 累加而非覆盖
                self.output_tokens += usage.output_tokens;
            }
            Ok(StreamEvent::Other) => {}
            Err(e) => {
                debug!("Skipping unparseable SSE event: {} - {}", e, data);
            }
        }
    }
}
