use thiserror::Error;
use trading_core::{sanitize_confidence, Action, ConsensusSignal, PredictorVote};

#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("No predictor responded")]
    NoVoters,
}

/// Majority vote over the committee.
///
/// The winner needs a strict plurality; a tie for first place, or a plurality
/// of HOLD, yields HOLD. Confidence is the mean over the winner's voters only.
pub fn aggregate(votes: &[PredictorVote]) -> Result<ConsensusSignal, AggregationError> {
    if votes.is_empty() {
        return Err(AggregationError::NoVoters);
    }

    let count = |action: Action| votes.iter().filter(|v| v.action == action).count();
    let buy_votes = count(Action::Buy);
    let sell_votes = count(Action::Sell);
    let hold_votes = count(Action::Hold);

    let action = if buy_votes > sell_votes && buy_votes > hold_votes {
        Action::Buy
    } else if sell_votes > buy_votes && sell_votes > hold_votes {
        Action::Sell
    } else {
        Action::Hold
    };

    let winners: Vec<&PredictorVote> = votes.iter().filter(|v| v.action == action).collect();
    let total = votes.len();

    // A tied HOLD can have no HOLD voters: report the largest faction
    let (confidence, consensus_score) = if winners.is_empty() {
        let largest = buy_votes.max(sell_votes);
        (0.0, 100.0 * largest as f64 / total as f64)
    } else {
        let mean = winners.iter().map(|v| v.confidence).sum::<f64>() / winners.len() as f64;
        (
            sanitize_confidence(mean),
            100.0 * winners.len() as f64 / total as f64,
        )
    };

    let models = votes
        .iter()
        .map(|v| format!("{}/{}", v.provider, v.model))
        .collect();

    let rationale = if winners.is_empty() {
        format!("split vote (BUY {} / SELL {} / HOLD {})", buy_votes, sell_votes, hold_votes)
    } else {
        winners
            .iter()
            .filter(|v| !v.rationale.is_empty())
            .map(|v| format!("{}: {}", v.provider, v.rationale))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    Ok(ConsensusSignal {
        action,
        confidence,
        consensus_score,
        models,
        rationale,
        buy_votes,
        sell_votes,
        hold_votes,
    })
}
