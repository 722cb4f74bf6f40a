use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("shape variable `{name}` has no value in the instance binding"))]
    MissingShapeVar { name: String },
    #[snafu(display("stage index {stage_id} out of bounds: graph has {num_stages} stages"))]
    StageOutOfBounds { stage_id: usize, num_stages: usize },
    #[snafu(display("axis `{axis}` not found in stage `{stage}`"))]
    UnknownAxis { axis: String, stage: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
