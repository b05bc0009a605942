use axum::{
    Json, Router,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use super::types::{
    AgentMetadata, AgentServer, ContainerBinding, ContainerQuery, EngineError, EngineResult,
    RenderedContainer, TaskEngineState,
};
use crate::lib::api::{DockerContainer, Resource, Task};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

impl AgentServer {
    pub fn new(
        state: Arc<TaskEngineState>,
        name: &str,
        address: &str,
        port: u16,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            state,
            name: name.to_string(),
            address: address.to_string(),
            port,
            resources,
        }
    }

    async fn get_metadata(AxumState(server): AxumState<Arc<AgentServer>>) -> Json<AgentMetadata> {
        Json(AgentMetadata {
            name: server.name.clone(),
            resources: server.resources.clone(),
            task_count: server.state.task_count(),
        })
    }

    async fn list_tasks(AxumState(server): AxumState<Arc<AgentServer>>) -> Json<Vec<Arc<Task>>> {
        Json(server.state.all_tasks())
    }

    async fn get_task(
        AxumState(server): AxumState<Arc<AgentServer>>,
        Path(arn): Path<String>,
    ) -> Response {
        match server.state.task_by_arn(&arn) {
            Some(task) => Json(task).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                format!("Task with arn {} not found", arn),
            )
                .into_response(),
        }
    }

    async fn add_task(
        AxumState(server): AxumState<Arc<AgentServer>>,
        Json(task): Json<Task>,
    ) -> Response {
        match server.state.add_task(task) {
            Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn bind_container(
        AxumState(server): AxumState<Arc<AgentServer>>,
        Json(binding): Json<ContainerBinding>,
    ) -> Response {
        match server.state.add_container(
            &binding.task_arn,
            &binding.container_name,
            binding.docker_id.as_str(),
            binding.docker_name.as_str(),
        ) {
            Ok(_) => (StatusCode::CREATED, Json(binding)).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn render_container(
        AxumState(server): AxumState<Arc<AgentServer>>,
        Query(query): Query<ContainerQuery>,
    ) -> Response {
        let rendered = server
            .state
            .task_by_arn(&query.task_arn)
            .ok_or_else(|| EngineError::TaskNotFound(query.task_arn.clone()))
            .and_then(|task| -> EngineResult<RenderedContainer> {
                let container = task.container_by_name(&query.container_name).ok_or_else(|| {
                    EngineError::ContainerNotFound {
                        task_arn: query.task_arn.clone(),
                        container: query.container_name.clone(),
                    }
                })?;
                Ok(RenderedContainer {
                    config: server.state.docker_config(&task, &container)?,
                    name: DockerContainer::generate_name(&task, &container),
                })
            });
        match rendered {
            Ok(rendered) => Json(rendered).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn stop_task(
        AxumState(server): AxumState<Arc<AgentServer>>,
        Path(arn): Path<String>,
    ) -> impl IntoResponse {
        match server.state.stop_task(&arn) {
            Ok(_) => (StatusCode::OK, format!("Task with arn {} stopping", arn)),
            Err(e) => (StatusCode::NOT_FOUND, e.to_string()),
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/v1/metadata", get(AgentServer::get_metadata))
            .route(
                "/v1/tasks",
                get(AgentServer::list_tasks).post(AgentServer::add_task),
            )
            .route(
                "/v1/tasks/{*arn}",
                get(AgentServer::get_task).delete(AgentServer::stop_task),
            )
            .route("/v1/containers", post(AgentServer::bind_container))
            .route("/v1/containers/config", get(AgentServer::render_container))
            .with_state(Arc::new(self))
    }

    pub async fn start_server(self) -> EngineResult<()> {
        let address = format!("{}:{}", self.address, self.port);
        let app = self.router();

        let listener = TcpListener::bind(&address).await?;
        info!(address = %address, "Introspection server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error_response(e: EngineError) -> Response {
    let status = match e {
        EngineError::TaskNotFound(_) | EngineError::ContainerNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        EngineError::DuplicateTask(_) | EngineError::UnresolvedReference { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::Docker(_) | EngineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::api::{CascadePolicy, Container, ContainerStatus, Observation, TaskStatus};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const ARN: &str = "arn:aws:ecs:us-west-2:1:task/abc";

    fn server() -> (Arc<TaskEngineState>, Router) {
        let state = Arc::new(TaskEngineState::new(CascadePolicy::None));
        state
            .add_task(Task::new(
                ARN,
                "web",
                "4",
                vec![Container::new("app", "example/app")],
            ))
            .unwrap();
        let server = AgentServer::new(
            state.clone(),
            "test_agent",
            "127.0.0.1",
            0,
            vec![Resource::integer("CPU", 2048)],
        );
        (state, server.router())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_metadata() {
        let (_, app) = server();
        let response = app
            .oneshot(Request::get("/v1/metadata").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "test_agent");
        assert_eq!(json["taskCount"], 1);
        assert_eq!(json["resources"][0]["longValue"], 2048);
    }

    #[tokio::test]
    async fn test_get_task_with_slashes_in_arn() {
        let (_, app) = server();
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/v1/tasks/{}", ARN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["family"], "web");
        assert_eq!(json["containers"][0]["name"], "app");

        let response = app
            .oneshot(Request::get("/v1/tasks/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_task() {
        let (state, app) = server();
        let definition = serde_json::json!({
            "arn": "arn:task/new",
            "family": "batch",
            "version": "1",
            "desiredStatus": "RUNNING",
            "knownStatus": "DEAD",
            "containers": [{"name": "job", "image": "example/job", "essential": true}]
        });
        let request = || {
            Request::post("/v1/tasks")
                .header("Content-Type", "application/json")
                .body(Body::from(definition.to_string()))
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let task = state.task_by_arn("arn:task/new").unwrap();
        assert_eq!(task.desired_status(), TaskStatus::Running);
        assert_eq!(task.known_status(), TaskStatus::None);
        assert!(task.container_by_name("job").unwrap().essential);

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_delete_task_requests_stop() {
        let (state, app) = server();
        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/v1/tasks/{}", ARN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task = state.task_by_arn(ARN).unwrap();
        assert_eq!(task.desired_status(), TaskStatus::Stopped);
        assert_eq!(task.containers()[0].desired_status(), ContainerStatus::Stopped);

        let response = app
            .oneshot(Request::delete("/v1/tasks/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_tasks() {
        let (_, app) = server();
        let response = app
            .oneshot(Request::get("/v1/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["arn"], ARN);
    }

    #[tokio::test]
    async fn test_bind_container() {
        let (state, app) = server();
        let request = |container: &str| {
            let body = serde_json::json!({
                "taskArn": ARN,
                "containerName": container,
                "dockerId": "d1",
                "dockerName": "ecs-web-4-app"
            });
            Request::post("/v1/containers")
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app.clone().oneshot(request("app")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.task_by_id("d1").unwrap().arn, ARN);
        assert!(
            state
                .apply_observation("d1", Observation::status(ContainerStatus::Running), None)
                .is_some()
        );

        let response = app.oneshot(request("ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_render_container() {
        let (state, app) = server();
        state
            .add_task(Task::new(
                "arn:task/linked",
                "linked",
                "1",
                vec![
                    {
                        let mut web = Container::new("web", "example/web");
                        web.links = vec!["db".to_string()];
                        web
                    },
                    Container::new("db", "postgres"),
                ],
            ))
            .unwrap();
        let get_config = |arn: &str, container: &str| {
            Request::get(format!(
                "/v1/containers/config?taskArn={}&containerName={}",
                arn.replace(':', "%3A").replace('/', "%2F"),
                container
            ))
            .body(Body::empty())
            .unwrap()
        };

        let response = app.clone().oneshot(get_config(ARN, "app")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["name"].as_str().unwrap().starts_with("ecs-web-4-app-"));
        assert_eq!(json["config"]["Image"], "example/app");
        assert_eq!(json["config"]["Labels"]["com.amazonaws.ecs.container-name"], "app");

        // db has no runtime container yet, so the link cannot be rendered
        let response = app
            .clone()
            .oneshot(get_config("arn:task/linked", "web"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.oneshot(get_config(ARN, "ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
