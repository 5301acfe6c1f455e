mod candidate_relay;

pub use candidate_relay::CandidateRelay;
