mod builder;
mod descriptions;
mod introspect;
mod run;

pub(crate) use run::run;
