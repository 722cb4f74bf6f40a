use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum SearchError {
    #[snafu(display("no search rules defined for target `{target}`"))]
    UnsupportedTarget { target: String },
    #[snafu(display("sketch generation produced no schedule skeletons"))]
    NoSketches,
    #[snafu(display("candidate set is empty after {stage}"))]
    EmptyCandidateSet { stage: &'static str },
    #[snafu(display("task has no reduction-bearing stage to tile"))]
    NoReductionStage,
    #[snafu(context(false), display("graph error: {source}"))]
    Graph { source: tessera_ir::Error },
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
