// Line - Classification of lines received from the bridge
//
// Every line the bridge prints is one of:
// - a control reply (ACK / NAK, possibly followed by detail tokens)
// - an asynchronous event ({...} JSON)
// - one of the startup banner lines printed after a reset
// - anything else (parameter echoes, counter values, firmware chatter)

/// Lines printed, in order, after a power-on or crash reset
pub const STARTUP_BANNER: [&str; 5] = [
    "EDF IAM Receiver",
    "SPI initialised",
    "Attaching interrupt",
    "Interrupt attached",
    "Finished init",
];

/// Classification of a single received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    Ack,
    /// NAK plus whatever detail followed it
    Nak(String),
    Event,
    /// Position of the line within `STARTUP_BANNER`
    Banner(usize),
    Text,
}

/// Classify a trimmed line
pub fn classify(line: &str) -> LineClass {
    let line = line.trim();
    if line.is_empty() {
        return LineClass::Blank;
    }
    if line.starts_with('{') {
        return LineClass::Event;
    }
    if let Some(index) = STARTUP_BANNER.iter().position(|b| *b == line) {
        return LineClass::Banner(index);
    }

    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("ACK") => LineClass::Ack,
        Some("NAK") => LineClass::Nak(tokens.collect::<Vec<_>>().join(" ")),
        _ => LineClass::Text,
    }
}

/// Parse a bare counter reply to a time query
pub fn parse_counter(line: &str) -> Option<u32> {
    line.trim().parse::<u32>().ok()
}
