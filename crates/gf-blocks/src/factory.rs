//! Text descriptions to blocks.
//!
//! Device definitions name their control elements with short strings like
//! `"delay(0.05)"` or `"2.5*deadband(0.02) shifted"`. The grammar is
//!
//! ```text
//! [GAIN*]KIND[(ARG, ...)] [key=value | flag]...
//! ```
//!
//! where positional arguments fill the kind's primary constants and the
//! trailing tokens go through the block's parameter and flag interfaces.

use gf_core::{Parameterized, Real};

use crate::block::Block;
use crate::error::{BlockError, BlockResult};
use crate::kind::{BlockConfig, BlockKind, DeadbandConfig};

pub fn make_block(text: &str) -> BlockResult<Block> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BlockError::parse(text, "empty block description"));
    }
    let (gain, rest) = split_gain_prefix(trimmed);
    let (name, args, tail) = split_head(text, rest)?;
    let vals = parse_args(text, args)?;
    let kind = pick_kind(text, name, &vals)?;

    let mut block = Block::new(BlockConfig::new(kind).with_gain(gain))
        .map_err(|e| BlockError::parse(text, e.to_string()))?;
    for tok in tail.split_whitespace() {
        match tok.split_once('=') {
            Some((key, value)) => {
                let value: Real = value
                    .parse()
                    .map_err(|_| BlockError::parse(text, format!("bad value for '{key}'")))?;
                block.set_param(key, value)?;
            }
            None => block.set_flag(tok, true)?,
        }
    }
    Ok(block)
}

/// A leading `K*` multiplies the block gain.
fn split_gain_prefix(text: &str) -> (Real, &str) {
    if let Some((num, rest)) = text.split_once('*') {
        if let Ok(k) = num.trim().parse::<Real>() {
            return (k, rest.trim());
        }
    }
    (1.0, text)
}

fn split_head<'a>(full: &str, rest: &'a str) -> BlockResult<(&'a str, &'a str, &'a str)> {
    match rest.find('(') {
        Some(open) if !rest[..open].contains(char::is_whitespace) => {
            let close = rest[open..]
                .find(')')
                .map(|i| open + i)
                .ok_or_else(|| BlockError::parse(full, "unbalanced parentheses"))?;
            Ok((
                rest[..open].trim(),
                &rest[open + 1..close],
                rest[close + 1..].trim(),
            ))
        }
        _ => {
            let (head, tail) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));
            Ok((head, "", tail.trim()))
        }
    }
}

fn parse_args(full: &str, args: &str) -> BlockResult<Vec<Real>> {
    args.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Real>()
                .map_err(|_| BlockError::parse(full, format!("bad argument '{s}'")))
        })
        .collect()
}

fn pick_kind(full: &str, name: &str, vals: &[Real]) -> BlockResult<BlockKind> {
    let arg = |i: usize, default: Real| vals.get(i).copied().unwrap_or(default);
    let kind = match name.to_ascii_lowercase().as_str() {
        "basic" | "gain" => BlockKind::Gain,
        "delay" | "filter" | "lag" => BlockKind::delay(arg(0, 0.1)),
        "integral" | "integrator" => BlockKind::Integral { iv: arg(0, 0.0) },
        "der" | "deriv" | "derivative" => BlockKind::Derivative { t1: arg(0, 0.1) },
        "fder" | "filtered_deriv" | "filtered_derivative" => BlockKind::FilteredDerivative {
            t1: arg(0, 0.1),
            t2: arg(1, 0.1),
        },
        "control" | "leadlag" | "lead_lag" => BlockKind::lead_lag(arg(0, 0.1), arg(1, 0.0)),
        "pid" => BlockKind::pid(arg(0, 1.0), arg(1, 0.0), arg(2, 0.0)),
        "deadband" | "db" => {
            let band = vals
                .first()
                .copied()
                .ok_or_else(|| BlockError::parse(full, "deadband needs a band width"))?;
            BlockKind::Deadband(DeadbandConfig::symmetric(band))
        }
        _ => return Err(BlockError::parse(full, format!("unknown block kind '{name}'"))),
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gf_dae::DynamicModel;

    #[test]
    fn plain_names_build_default_blocks() {
        let b = make_block("basic").unwrap();
        assert!(matches!(b.kind(), BlockKind::Gain));
        assert_eq!(b.gain(), 1.0);

        let b = make_block("delay").unwrap();
        assert!(matches!(b.kind(), BlockKind::Delay { t1 } if *t1 == 0.1));
    }

    #[test]
    fn gain_prefix_and_positional_args() {
        let b = make_block("2.5*delay(0.05)").unwrap();
        assert_eq!(b.gain(), 2.5);
        assert!(matches!(b.kind(), BlockKind::Delay { t1 } if *t1 == 0.05));

        let b = make_block("leadlag(0.2, 0.04)").unwrap();
        assert!(matches!(
            b.kind(),
            BlockKind::LeadLag { t1, t2 } if *t1 == 0.2 && *t2 == 0.04
        ));
    }

    #[test]
    fn tail_tokens_set_parameters_and_flags() {
        let mut b = make_block("deadband(0.02) shifted omax=0.5 omin=-0.5").unwrap();
        b.initialize_structure().unwrap();
        match b.kind() {
            BlockKind::Deadband(db) => assert!(db.shifted),
            other => panic!("wrong kind: {other:?}"),
        }
        assert_eq!(b.param("omax"), Some(0.5));
    }

    #[test]
    fn pid_arguments_fill_in_order() {
        let b = make_block("pid(2, 0.5, 0.1)").unwrap();
        assert!(matches!(
            b.kind(),
            BlockKind::Pid { p, i, d, .. } if *p == 2.0 && *i == 0.5 && *d == 0.1
        ));
    }

    #[test]
    fn malformed_descriptions_are_rejected() {
        assert!(make_block("").is_err());
        assert!(make_block("warp(0.1)").is_err());
        assert!(make_block("delay(0.1").is_err());
        assert!(make_block("delay(abc)").is_err());
        assert!(make_block("delay t1=fast").is_err());
        assert!(make_block("deadband").is_err());
    }
}
