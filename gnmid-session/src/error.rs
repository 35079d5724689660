use thiserror::Error;
use tonic::Status;

/// Aggregates every error kind a session can surface synchronously from
/// `Run` (§6, §7) into the single place status codes are decided, per
/// `SPEC_FULL.md` §7's error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("first message must be SubscriptionList")]
    FirstMessageNotSubscriptionList,
    #[error("stream EOF before init")]
    EofBeforeInit,
    #[error(transparent)]
    Resolve(#[from] gnmid_resolver::ResolveError),
    #[error(transparent)]
    Producer(#[from] gnmid_producer::ProducerError),
    #[error(transparent)]
    Admission(#[from] gnmid_admission::AdmissionError),
    #[error("invalid poll payload")]
    InvalidPollPayload,
    #[error("unsupported origin/target combination")]
    UnsupportedOriginTarget,
    #[error("connecting to backing store: {0}")]
    StoreConnect(gnmid_store::StoreError),
    #[error("stream was nil")]
    NilStream,
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<crate::select::SelectError> for EngineError {
    fn from(err: crate::select::SelectError) -> Self {
        match err {
            crate::select::SelectError::Unsupported => EngineError::UnsupportedOriginTarget,
            crate::select::SelectError::Store(e) => EngineError::StoreConnect(e),
        }
    }
}

impl From<EngineError> for Status {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FirstMessageNotSubscriptionList => Status::invalid_argument(err.to_string()),
            EngineError::EofBeforeInit => Status::aborted(err.to_string()),
            EngineError::Resolve(gnmid_resolver::ResolveError::NoSubscriptions) => {
                Status::not_found("invalid path")
            }
            EngineError::Resolve(gnmid_resolver::ResolveError::OriginConflict) => {
                Status::invalid_argument(err.to_string())
            }
            EngineError::Resolve(gnmid_resolver::ResolveError::InvalidPath(_)) => {
                Status::not_found(err.to_string())
            }
            EngineError::Producer(gnmid_producer::ProducerError::PathNotFound) => {
                Status::not_found(err.to_string())
            }
            EngineError::Producer(gnmid_producer::ProducerError::InvalidPath(_)) => {
                Status::not_found(err.to_string())
            }
            EngineError::Producer(_) => Status::aborted(err.to_string()),
            EngineError::Admission(gnmid_admission::AdmissionError::AtCapacity) => {
                Status::unavailable(err.to_string())
            }
            EngineError::InvalidPollPayload => Status::invalid_argument(err.to_string()),
            EngineError::UnsupportedOriginTarget => Status::unimplemented(err.to_string()),
            EngineError::StoreConnect(_) => Status::unavailable(err.to_string()),
            EngineError::NilStream => Status::failed_precondition(err.to_string()),
            EngineError::Transport(_) => Status::aborted(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_full_maps_to_unavailable() {
        let status: Status = EngineError::Admission(gnmid_admission::AdmissionError::AtCapacity).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn origin_conflict_maps_to_invalid_argument() {
        let status: Status = EngineError::Resolve(gnmid_resolver::ResolveError::OriginConflict).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn path_not_found_maps_to_not_found() {
        let status: Status = EngineError::Producer(gnmid_producer::ProducerError::PathNotFound).into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
