use crate::cue::{Cue, DEFAULT_SPEAKER};

use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::{char, digit1, line_ending, space0, space1};
use nom::combinator::{map_res, opt};
use nom::error::{ErrorKind, VerboseError};
use nom::multi::many_till;
use nom::sequence::{delimited, terminated};
use nom::{branch::alt, error_position, Err, IResult};
use tracing::{debug, info, warn};

/// Lenient cue parser. Blocks that do not look like a cue are dropped
/// instead of failing the whole input.
pub struct Parser;
impl Parser {
    pub fn new() -> Self {
        Self {}
    }

    pub fn parse(&mut self, input: &str) -> Vec<Cue> {
        let input = match optional_bom(input) {
            Ok((rest, _)) => rest,
            Err(_) => input,
        };

        let mut cues = Vec::new();
        for block in blocks(input) {
            match cue_block(&block) {
                Ok((_, raw)) if raw.lines.is_empty() => {
                    debug!("Dropping cue block without text: {:?}", block);
                }
                Ok((_, raw)) => {
                    if raw.end_ms <= raw.start_ms {
                        warn!(
                            "Dropping cue {} with non-positive duration ({} --> {})",
                            raw.index, raw.start_ms, raw.end_ms
                        );
                        continue;
                    }
                    cues.push(raw.into_cue());
                }
                Err(_) => {
                    debug!("Dropping malformed cue block: {:?}", block);
                }
            }
        }

        info!("Parsed {} cues", cues.len());
        cues
    }
}

struct RawCue<'a> {
    index: usize,
    start_ms: u64,
    end_ms: u64,
    lines: Vec<&'a str>,
}

impl RawCue<'_> {
    fn into_cue(self) -> Cue {
        let joined = self
            .lines
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let (speaker, text) = match speaker_tag(joined.trim_start()) {
            Ok((rest, speaker)) => (speaker.to_string(), rest.trim().to_string()),
            Err(_) => (DEFAULT_SPEAKER.to_string(), joined.trim().to_string()),
        };
        Cue {
            index: self.index,
            start: self.start_ms as f64 / 1000.0,
            end: self.end_ms as f64 / 1000.0,
            speaker,
            text,
        }
    }
}

/// Groups non-blank lines into blocks. Line endings are normalised to `\n`.
fn blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn optional_bom(input: &str) -> IResult<&str, Option<&str>, VerboseError<&str>> {
    opt(tag("\u{FEFF}"))(input)
}

fn cue_block(input: &str) -> IResult<&str, RawCue<'_>, VerboseError<&str>> {
    let (input, _) = space0(input)?;
    let (input, index) = terminated(seq_num, terminated(space0, line_ending))(input)?;
    let (input, (start_ms, end_ms)) = terminated(show_hide, line_ending)(input)?;
    let (input, lines) = cue_text(input)?;

    Ok((
        input,
        RawCue {
            index,
            start_ms,
            end_ms,
            lines,
        },
    ))
}

fn end_of_file(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    if input.is_empty() {
        Ok((input, input))
    } else {
        std::result::Result::Err(Err::Error(error_position!(input, ErrorKind::Eof)))
    }
}

fn cue_text(input: &str) -> IResult<&str, Vec<&str>, VerboseError<&str>> {
    let line = terminated(
        take_while1(|c: char| c != '\n' && c != '\r'),
        alt((line_ending, end_of_file)),
    );

    let (input, (lines, _)) = many_till(line, end_of_file)(input)?;

    Ok((input, lines))
}

fn speaker_tag(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    delimited(char('['), take_while1(|c: char| c != ']'), char(']'))(input)
}

fn show_hide(input: &str) -> IResult<&str, (u64, u64), VerboseError<&str>> {
    let (input, show_at) = timestamp(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-->")(input)?;
    let (input, _) = space1(input)?;
    let (input, hide_at) = timestamp(input)?;
    let (input, _) = space0(input)?;

    Ok((input, (show_at, hide_at)))
}

/// `H:MM:SS,mmm` as whole milliseconds.
fn timestamp(input: &str) -> IResult<&str, u64, VerboseError<&str>> {
    const MILLIS_MIN: usize = 1;
    const MILLIS_MAX: usize = 3;
    let take_millis = || {
        map_res(
            take_while_m_n(MILLIS_MIN, MILLIS_MAX, |c: char| c.is_ascii_digit()),
            // `,5` means 500ms, not 5ms.
            |s: &str| format!("{:0<3}", s).parse::<u64>(),
        )
    };

    const MS_MIN: usize = 1;
    const MS_MAX: usize = 2;
    let take_ms = || {
        map_res(
            take_while_m_n(MS_MIN, MS_MAX, |c: char| c.is_ascii_digit()),
            |s: &str| s.parse::<u64>(),
        )
    };

    let (input, hours) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, minutes) = take_ms()(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, seconds) = take_ms()(input)?;
    let (input, _) = tag(",")(input)?;
    let (rest, millis) = take_millis()(input)?;

    let total = hours
        .checked_mul(60 * 60 * 1000)
        .and_then(|h| h.checked_add(minutes * 60 * 1000 + seconds * 1000 + millis));
    match total {
        Some(total) => Ok((rest, total)),
        None => std::result::Result::Err(Err::Error(error_position!(input, ErrorKind::TooLarge))),
    }
}

fn seq_num(input: &str) -> IResult<&str, usize, VerboseError<&str>> {
    map_res(digit1, |s: &str| s.parse())(input)
}
