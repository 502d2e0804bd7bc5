//! Monte Carlo prediction of football match events: goals, cards, corners and the match outcome.
//! Team strength is shrunk toward league anchors, player ratings adjust for announced lineups, and
//! simulated probabilities are calibrated against backtested outcomes.

#![allow(clippy::too_many_arguments)]

pub mod anchors;
pub mod backtest;
pub mod cache;
pub mod calibration;
pub mod context;
pub mod data;
pub mod dist;
pub mod file;
pub mod lineup;
pub mod mc;
pub mod opt;
pub mod params;
pub mod player;
pub mod predictor;
pub mod print;
pub mod probs;
pub mod strength;
pub mod warning;

#[cfg(test)]
pub(crate) mod testing;

#[doc = include_str!("../README.md")]
#[cfg(doc)]
fn readme() {}
