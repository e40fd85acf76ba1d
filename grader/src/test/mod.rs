mod runner_docker;
pub mod util;
