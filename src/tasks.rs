pub(crate) mod batch;
pub(crate) mod events;
pub(crate) mod pipeline;
