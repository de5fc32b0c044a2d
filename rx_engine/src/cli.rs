use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rx_engine::{Point, SimpleCardDescriptor, Size};

#[derive(Parser, Debug)]
#[command(about = "Headless host that drives the card engine from a data root", version)]
pub struct Args {
    /// Directory holding the stack archives (`<stack>.rxa`, `<stack>_*.rxa`)
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Optional JSON engine configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stack of the start card (requires --card)
    #[arg(long)]
    pub stack: Option<String>,

    /// Id of the start card (requires --stack)
    #[arg(long)]
    pub card: Option<u16>,

    /// Window size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_viewport)]
    pub viewport: Option<Size>,

    /// Click at window coordinates X,Y (bottom-left origin); repeatable
    #[arg(long = "click", value_parser = parse_point)]
    pub clicks: Vec<Point>,

    /// Number of display frames to tick after the clicks
    #[arg(long, default_value_t = 30)]
    pub frames: u32,

    /// Restore this saved game state instead of opening the start card
    #[arg(long)]
    pub load_state: Option<PathBuf>,

    /// Path to write the engine event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write the final game state as JSON
    #[arg(long)]
    pub save_state: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunArgs {
    pub data_root: PathBuf,
    pub config: Option<PathBuf>,
    pub start: Option<SimpleCardDescriptor>,
    pub viewport: Option<Size>,
    pub clicks: Vec<Point>,
    pub frames: u32,
    pub load_state: Option<PathBuf>,
    pub event_log_json: Option<PathBuf>,
    pub save_state: Option<PathBuf>,
}

pub fn parse() -> Result<RunArgs> {
    Args::parse().into_run_args()
}

impl Args {
    fn into_run_args(self) -> Result<RunArgs> {
        let start = match (self.stack, self.card) {
            (Some(stack), Some(card)) => Some(SimpleCardDescriptor::new(stack, card)),
            (None, None) => None,
            _ => bail!("--stack and --card must be given together"),
        };
        if start.is_some() && self.load_state.is_some() {
            bail!("--load-state cannot be combined with --stack/--card");
        }
        Ok(RunArgs {
            data_root: self.data_root,
            config: self.config,
            start,
            viewport: self.viewport,
            clicks: self.clicks,
            frames: self.frames,
            load_state: self.load_state,
            event_log_json: self.event_log_json,
            save_state: self.save_state,
        })
    }
}

fn parse_viewport(raw: &str) -> Result<Size> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .with_context(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    Ok(Size::new(
        width.trim().parse().context("parsing viewport width")?,
        height.trim().parse().context("parsing viewport height")?,
    ))
}

fn parse_point(raw: &str) -> Result<Point> {
    let (x, y) = raw
        .split_once(',')
        .with_context(|| format!("expected X,Y, got '{raw}'"))?;
    Ok(Point::new(
        x.trim().parse().context("parsing click x")?,
        y.trim().parse().context("parsing click y")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Result<RunArgs> {
        let mut argv = vec!["rx_engine", "--data-root", "data"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)?.into_run_args()
    }

    #[test]
    fn start_card_needs_stack_and_card() {
        let run = args(&["--stack", "aspit", "--card", "3"]).unwrap();
        assert_eq!(run.start, Some(SimpleCardDescriptor::new("aspit", 3)));
        assert!(args(&["--card", "3"]).is_err());
    }

    #[test]
    fn viewport_and_clicks_parse() {
        let run = args(&["--viewport", "1216x944", "--click", "50,422", "--click", "10, 20"]).unwrap();
        assert_eq!(run.viewport, Some(Size::new(1216.0, 944.0)));
        assert_eq!(run.clicks, vec![Point::new(50.0, 422.0), Point::new(10.0, 20.0)]);
        assert!(args(&["--viewport", "1216"]).is_err());
    }
}
