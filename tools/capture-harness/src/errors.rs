use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("channel init error: {0}")]
    ChannelInit(String),
    #[error("channel io error: {0}")]
    ChannelIo(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
}
