use std::io::Write;
use tinykube::error::{Result, TinykubeError};
use tinykube::manifest::Manifest;
use tinykube::model::{NodePortRange, Protocol, ServiceType};

#[test]
fn test_error_types() {
    let err = TinykubeError::NodePortConflict {
        port: 30080,
        owner: "demo".to_string(),
    };
    assert!(err.to_string().contains("30080"));
    assert!(err.to_string().contains("demo"));

    let err = TinykubeError::NoEndpoints {
        service: "demo".to_string(),
        protocol: "TCP".to_string(),
        port: 80,
    };
    assert_eq!(err.to_string(), "No endpoints available for demo TCP/80");
}

#[test]
fn test_version_const() {
    assert!(!tinykube::VERSION.is_empty());
}

fn write_manifest(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn load(files: &[&tempfile::NamedTempFile]) -> Result<Manifest> {
    let paths: Vec<_> = files.iter().map(|f| f.path()).collect();
    Manifest::load_all(&paths, NodePortRange::default())
}

const DEPLOYMENT: &str = r#"
kind: Deployment
name: demo
replicas: 2
selector:
  matchLabels:
    app: demo
template:
  metadata:
    labels:
      app: demo
      tier: web
  spec:
    containers:
      - image: tinykube/responder:0.1.0
        ports:
          - containerPort: 8080
"#;

const SERVICE: &str = r#"
kind: Service
name: demo
type: NodePort
selector:
  app: demo
ports:
  - protocol: TCP
    port: 80
    targetPort: 8080
    nodePort: 30080
"#;

#[test]
fn test_load_manifests_from_files() {
    let deployment = write_manifest(DEPLOYMENT);
    let service = write_manifest(SERVICE);

    let manifest = load(&[&deployment, &service]).unwrap();
    assert_eq!(manifest.deployments.len(), 1);
    assert_eq!(manifest.services.len(), 1);

    let d = &manifest.deployments[0];
    assert_eq!(d.replicas, 2);
    assert_eq!(d.template.container_ports, vec![8080]);
    assert_eq!(d.template.image.name, "tinykube/responder");

    let s = &manifest.services[0];
    assert_eq!(s.service_type, ServiceType::NodePort);
    assert_eq!(s.ports[0].protocol, Protocol::Tcp);
    assert_eq!(s.ports[0].node_port, Some(30080));
}

#[test]
fn test_multi_document_file() {
    let file = write_manifest(&format!("{}---\n{}", DEPLOYMENT, SERVICE));
    let manifest = load(&[&file]).unwrap();
    assert_eq!(manifest.deployments.len(), 1);
    assert_eq!(manifest.services.len(), 1);
}

#[test]
fn test_same_name_across_files_rejected() {
    let first = write_manifest(SERVICE);
    let second = write_manifest(SERVICE);
    assert!(load(&[&first, &second]).is_err());
}

#[test]
fn test_missing_file_names_path() {
    let err = Manifest::load_all(&["/nonexistent/tinykube.yaml"], NodePortRange::default())
        .unwrap_err();
    assert!(matches!(err, TinykubeError::Manifest(_)));
    assert!(err.to_string().contains("/nonexistent/tinykube.yaml"));
}

#[test]
fn test_node_port_out_of_range_rejected() {
    let file = write_manifest(&SERVICE.replace("30080", "8080"));
    let err = load(&[&file]).unwrap_err();
    assert!(err.to_string().contains("8080"));
}

#[test]
fn test_duplicate_port_mapping_rejected() {
    let file = write_manifest(&format!(
        "{}  - protocol: TCP\n    port: 80\n    targetPort: 9090\n",
        SERVICE
    ));
    assert!(load(&[&file]).is_err());
}

#[test]
fn test_bundled_demo_manifest() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/manifests/demo.yaml");
    let manifest = Manifest::load_all(&[path], NodePortRange::default()).unwrap();

    assert_eq!(manifest.deployments[0].template.image.name, tinykube::RESPONDER_IMAGE);
    assert_eq!(manifest.deployments[0].template.image.tag, tinykube::VERSION);
    assert_eq!(manifest.services[0].ports[0].node_port, Some(30080));
}
