mod run;
mod scoring;

pub(crate) use run::run;

#[cfg(test)]
mod tests;
