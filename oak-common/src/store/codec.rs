use serde_json::Value;

/// 记录的结构化内容
pub type Document = Value;

/// 编解码失败，由调用方补充操作和记录信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecError;

/// 文档序列化格式
///
/// 存储层只要求格式能无损往返结构化文档，空内容解码为 `Null`。
pub trait DocumentCodec: Send + Sync {
    /// 编码文档，可选地在开头加上说明注释
    fn encode(&self, document: &Document, header: Option<&str>) -> Result<String, CodecError>;

    /// 解码文档
    fn decode(&self, text: &str) -> Result<Document, CodecError>;
}

/// 默认格式: 带 `#` 注释头的 JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

const BANNER_NOTICE: &str = "DO NOT EDIT DIRECTLY - Use the tool interface";

impl DocumentCodec for JsonCodec {
    fn encode(&self, document: &Document, header: Option<&str>) -> Result<String, CodecError> {
        let body = serde_json::to_string_pretty(document).map_err(|_| CodecError)?;
        let mut content = String::with_capacity(body.len() + 96);
        if let Some(header) = header {
            for line in header.lines() {
                content.push_str("# ");
                content.push_str(line);
                content.push('\n');
            }
            content.push_str("# ");
            content.push_str(BANNER_NOTICE);
            content.push_str("\n\n");
        }
        content.push_str(&body);
        content.push('\n');
        Ok(content)
    }

    fn decode(&self, text: &str) -> Result<Document, CodecError> {
        // 跳过开头的注释行和空行
        let mut rest = text;
        loop {
            let trimmed = rest.trim_start();
            if trimmed.starts_with('#') {
                rest = match trimmed.find('\n') {
                    Some(pos) => &trimmed[pos + 1..],
                    None => "",
                };
            } else {
                rest = trimmed;
                break;
            }
        }

        if rest.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(rest).map_err(|_| CodecError)
    }
}
