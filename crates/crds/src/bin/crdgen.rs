//! Prints the ReplicaPool CRD manifest as YAML.

use anyhow::Result;
use crds::ReplicaPool;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&ReplicaPool::crd())?);
    Ok(())
}
