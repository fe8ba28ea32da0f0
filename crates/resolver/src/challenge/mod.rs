//! Anti-bot challenge detection and one-shot recovery.

pub mod detect;
pub mod recovery;
pub mod solver;

pub use detect::{ChallengeVerdict, cookie_scripts, detect_challenge};
pub use recovery::{ChallengeRecovery, ChallengeState, DEFAULT_CHALLENGE_TIMEOUT};
pub use solver::{ChallengeSolver, FlareSolverr, SolvedChallenge, solve_with_script};
