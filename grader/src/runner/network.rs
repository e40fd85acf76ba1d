use bollard::{
    network::{CreateNetworkOptions, InspectNetworkOptions},
    Docker,
};

use super::util::{is_conflict, is_not_found};

/// Make sure a bridge network called `name` exists.
pub async fn ensure_network(docker: &Docker, name: &str) -> Result<(), bollard::errors::Error> {
    match docker
        .inspect_network(name, None::<InspectNetworkOptions<String>>)
        .await
    {
        Ok(_) => return Ok(()),
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(e),
    }

    tracing::info!(network = name, "Creating network");
    let res = docker
        .create_network(CreateNetworkOptions {
            name,
            check_duplicate: true,
            driver: "bridge",
            ..Default::default()
        })
        .await;
    match res {
        Ok(_) => Ok(()),
        // created concurrently by another submission
        Err(e) if is_conflict(&e) => Ok(()),
        Err(e) => Err(e),
    }
}
