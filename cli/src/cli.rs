#[derive(Debug, clap::Parser)]
#[clap(name = "hammer", version, author)]
pub struct Args {
    /// The targets to build; defaults to the first declared target
    pub targets: Vec<String>,

    /// Force rebuild; treat every rule as dirty regardless of mtimes
    #[clap(short = 'B', long = "force")]
    pub force: bool,

    /// Evaluate the `dir` block matching DIR
    #[clap(short = 'd', long = "dir", value_name = "DIR")]
    pub dir: Option<String>,

    /// Run N jobs in parallel (1 to 1024)
    #[clap(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,
}
