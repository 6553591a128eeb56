use cloudlet_client::{
    request::{ControlRequest, DeployRequest, RemoveRequest},
    response::ControllerResponse,
};
use log::debug;
use utils::{
    net::send_recv,
    serde::json_line::{json_dump, json_load},
};

use crate::cloudlet_client_error::CloudletClientError;

/// Whatever the controller wrote back within the single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerAck {
    Empty,
    Response(ControllerResponse),
    Text(String),
}

impl ControllerAck {
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return ControllerAck::Empty;
        }
        match json_load::<ControllerResponse>(bytes) {
            Ok(response) => ControllerAck::Response(response),
            Err(_) => ControllerAck::Text(String::from_utf8_lossy(bytes).trim_end().to_owned()),
        }
    }
}

pub async fn deploy(
    host: &str,
    port: u16,
    request: DeployRequest,
) -> Result<ControllerAck, CloudletClientError> {
    communicate(host, port, &ControlRequest::Deploy(request)).await
}

pub async fn remove(
    host: &str,
    port: u16,
    request: RemoveRequest,
) -> Result<ControllerAck, CloudletClientError> {
    communicate(host, port, &ControlRequest::Remove(request)).await
}

async fn communicate(
    host: &str,
    port: u16,
    request: &ControlRequest,
) -> Result<ControllerAck, CloudletClientError> {
    let line = json_dump(request)?;
    debug!("Sending {} request to {host}:{port}", request.method());
    let response = send_recv(host, port, Some(&line)).await?;
    Ok(ControllerAck::parse(&response))
}

#[cfg(test)]
mod test {
    use cloudlet_client::{
        request::{DeployParams, DeployRequest, DeployType, PortMap, RemoveRequest},
        response::ControllerResponse,
    };
    use serde_json::Value;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
        task::JoinHandle,
    };

    use super::ControllerAck;
    use crate::cloudlet_client_error::CloudletClientError;

    async fn create_controller(response: &'static [u8]) -> (u16, JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let controller = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(response).await.unwrap();
            serde_json::from_str(&line).unwrap()
        });
        (port, controller)
    }

    fn create_example_deploy_request() -> DeployRequest {
        DeployRequest::build(
            DeployType::Fwd,
            DeployParams {
                name: String::from("app-sample"),
                port: PortMap::new(8888, 30088),
                src_addr: Some(String::from("10.0.0.5:30088")),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn parse_ack() {
        assert_eq!(ControllerAck::parse(b""), ControllerAck::Empty);
        assert_eq!(
            ControllerAck::parse(br#"{"ok":true,"msg":"deployed"}"#),
            ControllerAck::Response(ControllerResponse {
                ok: true,
                msg: String::from("deployed")
            })
        );
        assert_eq!(
            ControllerAck::parse(b"accepted\n"),
            ControllerAck::Text(String::from("accepted"))
        );
    }

    #[tokio::test]
    async fn deploy() {
        let (port, controller) = create_controller(br#"{"ok":true,"msg":""}"#).await;

        let ack = super::deploy("127.0.0.1", port, create_example_deploy_request())
            .await
            .unwrap();

        assert!(matches!(ack, ControllerAck::Response(ControllerResponse { ok: true, .. })));
        let request = controller.await.unwrap();
        assert_eq!(request["method"], "deploy");
        assert_eq!(request["deploy"]["type"], "fwd");
        assert_eq!(request["deploy"]["fwd"]["srcAddr"], "10.0.0.5:30088");
    }

    #[tokio::test]
    async fn remove() {
        let (port, controller) = create_controller(b"").await;

        let ack = super::remove("127.0.0.1", port, RemoveRequest::new("app-sample"))
            .await
            .unwrap();

        assert_eq!(ack, ControllerAck::Empty);
        let request = controller.await.unwrap();
        assert_eq!(request["method"], "remove");
        assert_eq!(request["remove"]["name"], "app-sample");
        assert_eq!(request["deploy"], Value::Null);
    }

    #[tokio::test]
    async fn offline_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(matches!(
            super::remove("127.0.0.1", port, RemoveRequest::new("app-sample")).await,
            Err(CloudletClientError::CommunicationFail(_))
        ));
    }
}
