mod corpus;
mod pipeline;
mod prompt;
mod retrieval;
mod run;

pub(crate) use run::run;
