//! RunController：驱动一次 Run 的回合循环
//!
//! 每轮：Supervisor.select_next -> 完成则 completed；否则只执行被选中的第一个智能体，
//! 追加其消息与一条路由记录，更新 progress，回到 Supervisor。
//! 超出委派轮数上限 -> TurnBudgetExceeded；未知 / 已用尽的智能体 -> UnknownAgentSelected；
//! 智能体返回的 Run 级错误直接使 Run 失败，错误只记录在 Run.error 中，不向调用方抛出。
//!
//! 两种模式都在独立的 tokio 任务中执行 drive：start 立即返回，run_sync 等待任务结束。
//! 调用方放弃等待（如 HTTP 客户端断开）不会中断 Run，Run 仍会进入终态。

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, SUPERVISOR_NAME};
use crate::core::run::{new_run_id, Run, RunId, RunSummary};
use crate::core::store::AnalysisStore;
use crate::core::supervisor::{Router, RoutingDecision};
use crate::core::AgentError;
use crate::memory::{Message, Role};

/// Run 级安全上限
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// 委派轮数上限
    pub turn_budget: usize,
    /// 单个智能体在一次 Run 中可被委派的次数；None 为不限
    pub max_calls_per_agent: Option<usize>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            turn_budget: 10,
            max_calls_per_agent: None,
        }
    }
}

#[derive(Clone)]
pub struct RunController {
    router: Arc<dyn Router>,
    agents: Arc<HashMap<String, Arc<dyn Agent>>>,
    roster: Arc<Vec<String>>,
    store: AnalysisStore,
    limits: RunLimits,
}

impl RunController {
    pub fn new(
        router: Arc<dyn Router>,
        agents: Vec<Arc<dyn Agent>>,
        store: AnalysisStore,
        limits: RunLimits,
    ) -> Self {
        let roster = agents.iter().map(|a| a.name().to_string()).collect();
        let agents = agents
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            router,
            agents: Arc::new(agents),
            roster: Arc::new(roster),
            store,
            limits,
        }
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// 智能体名，按注册顺序
    pub fn agent_names(&self) -> &[String] {
        &self.roster
    }

    async fn create(&self, query: &str, session_id: &str) -> Result<(RunId, CancellationToken), AgentError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::InvalidRequest("query must not be empty".to_string()));
        }
        let run_id = new_run_id();
        let cancel = self
            .store
            .insert(Run::new(run_id.clone(), session_id, query))
            .await;
        Ok((run_id, cancel))
    }

    /// 异步启动：立即返回 run_id，回合循环在后台任务中执行
    pub async fn start(&self, query: &str, session_id: &str) -> Result<RunId, AgentError> {
        let (run_id, cancel) = self.create(query, session_id).await?;
        let this = self.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            this.drive(&id, cancel).await;
        });
        Ok(run_id)
    }

    /// 同步执行：阻塞到 Run 进入终态后返回完整快照
    pub async fn run_sync(&self, query: &str, session_id: &str) -> Result<Run, AgentError> {
        let (run_id, cancel) = self.create(query, session_id).await?;
        let this = self.clone();
        let id = run_id.clone();
        let handle = tokio::spawn(async move {
            this.drive(&id, cancel).await;
        });
        if let Err(e) = handle.await {
            tracing::error!(run_id = %run_id, error = %e, "run task aborted");
        }
        self.get_result(&run_id).await
    }

    pub async fn get_status(&self, run_id: &str) -> Result<RunSummary, AgentError> {
        self.store
            .summary(run_id)
            .await
            .ok_or_else(|| AgentError::RunNotFound(run_id.to_string()))
    }

    pub async fn get_result(&self, run_id: &str) -> Result<Run, AgentError> {
        self.store
            .get(run_id)
            .await
            .ok_or_else(|| AgentError::RunNotFound(run_id.to_string()))
    }

    /// 删除记录并取消仍在执行的后台任务
    pub async fn delete(&self, run_id: &str) -> Result<(), AgentError> {
        if self.store.remove(run_id).await {
            tracing::info!(run_id, "run deleted");
            Ok(())
        } else {
            Err(AgentError::RunNotFound(run_id.to_string()))
        }
    }

    pub async fn list(&self) -> Vec<RunSummary> {
        self.store.list().await
    }

    /// 执行并终结一次 Run；取消或删除后不再写回
    async fn drive(&self, run_id: &str, cancel: CancellationToken) {
        if !self.store.update(run_id, |r| {
            r.start();
        })
        .await
        {
            return;
        }
        tracing::info!(run_id, "run started");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.execute(run_id) => r,
        };

        let written = match &outcome {
            Ok(()) => {
                self.store
                    .update(run_id, |r| {
                        r.complete();
                    })
                    .await
            }
            Err(AgentError::Cancelled) | Err(AgentError::RunNotFound(_)) => false,
            Err(e) => self.store.update(run_id, |r| {
                r.fail(e);
            })
            .await,
        };

        match (&outcome, written) {
            (Ok(()), true) => tracing::info!(run_id, "run completed"),
            (Err(e), true) => tracing::warn!(run_id, kind = e.kind(), error = %e, "run failed"),
            _ => tracing::debug!(run_id, "finalize dropped, run no longer in store"),
        }
    }

    async fn snapshot(&self, run_id: &str) -> Result<Vec<Message>, AgentError> {
        self.store
            .get(run_id)
            .await
            .map(|r| r.conversation.messages().to_vec())
            .ok_or_else(|| AgentError::RunNotFound(run_id.to_string()))
    }

    async fn append(&self, run_id: &str, msgs: Vec<Message>, progress: Option<String>, turns: usize) -> Result<(), AgentError> {
        let ok = self
            .store
            .update(run_id, |r| {
                r.append(msgs);
                r.turns = turns;
                if let Some(p) = progress {
                    r.set_progress(p);
                }
            })
            .await;
        if ok {
            Ok(())
        } else {
            Err(AgentError::RunNotFound(run_id.to_string()))
        }
    }

    /// 回合循环；返回 Ok 表示 Supervisor 宣布完成
    async fn execute(&self, run_id: &str) -> Result<(), AgentError> {
        let budget = self.limits.turn_budget;
        let mut calls: HashMap<String, usize> = HashMap::new();
        let mut turns = 0usize;

        loop {
            let mut snapshot = self.snapshot(run_id).await?;
            let decision = self.router.select_next(&snapshot).await?;

            let (agents, rationale) = match decision {
                RoutingDecision::Delegate { agents, rationale } if !agents.is_empty() => (agents, rationale),
                RoutingDecision::Delegate { rationale, .. } | RoutingDecision::Done { rationale } => {
                    let note = if rationale.trim().is_empty() {
                        "FINISH".to_string()
                    } else {
                        rationale
                    };
                    self.append(
                        run_id,
                        vec![Message::routing(Role::Agent, SUPERVISOR_NAME, note)],
                        None,
                        turns,
                    )
                    .await?;
                    return Ok(());
                }
            };

            if agents.len() > 1 {
                tracing::warn!(run_id, selected = ?agents, "supervisor selected multiple agents, running only the first");
            }
            let name = agents[0].clone();

            if turns >= budget {
                return Err(AgentError::TurnBudgetExceeded(turns));
            }

            let agent = self
                .agents
                .get(&name)
                .cloned()
                .ok_or_else(|| AgentError::UnknownAgentSelected(name.clone()))?;
            let used = calls.entry(name.clone()).or_insert(0);
            if let Some(max) = self.limits.max_calls_per_agent {
                if *used >= max {
                    return Err(AgentError::UnknownAgentSelected(format!(
                        "{} (already ran {} times)",
                        name, max
                    )));
                }
            }
            *used += 1;
            turns += 1;

            let decision_msg = Message::routing(
                Role::Agent,
                SUPERVISOR_NAME,
                if rationale.trim().is_empty() {
                    format!("transfer_to_{}", name)
                } else {
                    format!("transfer_to_{}: {}", name, rationale.trim())
                },
            );
            snapshot.push(decision_msg.clone());
            self.append(
                run_id,
                vec![decision_msg],
                Some(format!("Turn {}/{}: {} working...", turns, budget, name)),
                turns,
            )
            .await?;
            tracing::info!(run_id, turn = turns, agent = %name, "turn delegated");

            let mut produced = agent.respond(&snapshot).await?;
            produced.push(Message::routing(
                Role::System,
                name.clone(),
                format!("{} finished turn {}; control returned to supervisor", name, turns),
            ));
            self.append(
                run_id,
                produced,
                Some(format!("Turn {}/{}: {} finished", turns, budget, name)),
                turns,
            )
            .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// 按顺序委派给 names，之后宣布完成
    struct SequenceRouter {
        names: Vec<String>,
        calls: AtomicUsize,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Router for SequenceRouter {
        async fn select_next(&self, _c: &[Message]) -> Result<RoutingDecision, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(SUPERVISOR_NAME.to_string());
            Ok(match self.names.get(n) {
                Some(name) => RoutingDecision::Delegate {
                    agents: vec![name.clone()],
                    rationale: String::new(),
                },
                None => RoutingDecision::Done {
                    rationale: String::new(),
                },
            })
        }
    }

    /// 每次都返回同一决策
    struct FixedRouter {
        decision: RoutingDecision,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Router for FixedRouter {
        async fn select_next(&self, _c: &[Message]) -> Result<RoutingDecision, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.decision.clone())
        }
    }

    /// 回复 "<query>-handled-by-<name>"
    struct EchoAgent {
        name: String,
        runs: AtomicUsize,
        delay: Duration,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl EchoAgent {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                runs: AtomicUsize::new(0),
                delay: Duration::ZERO,
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn respond(&self, conversation: &[Message]) -> Result<Vec<Message>, AgentError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let query = conversation
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(vec![Message::agent(
                self.name.clone(),
                format!("{}-handled-by-{}", query, self.name),
            )])
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn respond(&self, _c: &[Message]) -> Result<Vec<Message>, AgentError> {
            Err(AgentError::UpstreamUnavailable("503".to_string()))
        }
    }

    fn delegate(names: &[&str]) -> RoutingDecision {
        RoutingDecision::Delegate {
            agents: names.iter().map(|s| s.to_string()).collect(),
            rationale: "next".to_string(),
        }
    }

    fn controller(router: Arc<dyn Router>, agents: Vec<Arc<dyn Agent>>, limits: RunLimits) -> RunController {
        RunController::new(router, agents, AnalysisStore::new(), limits)
    }

    async fn wait_terminal(ctl: &RunController, id: &str) -> Run {
        for _ in 0..500 {
            let run = ctl.get_result(id).await.unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {} did not finish", id);
    }

    #[tokio::test]
    async fn test_three_agent_chain_round_trip() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(SequenceRouter {
            names: vec!["agent-1".into(), "agent-2".into(), "agent-3".into()],
            calls: AtomicUsize::new(0),
            log: log.clone(),
        });
        let agents: Vec<Arc<dyn Agent>> = vec![
            EchoAgent::new("agent-1", &log),
            EchoAgent::new("agent-2", &log),
            EchoAgent::new("agent-3", &log),
        ];
        let ctl = controller(router, agents, RunLimits::default());

        let run = ctl.run_sync("ping", "default").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.final_result.as_deref(), Some("ping-handled-by-agent-3"));
        assert_eq!(run.turns, 3);
        // Supervisor 总是先于下属智能体
        assert_eq!(
            *log.lock().unwrap(),
            vec!["supervisor", "agent-1", "supervisor", "agent-2", "supervisor", "agent-3", "supervisor"]
        );
        // user + 3 * (decision + content + record) + finish
        assert_eq!(run.conversation.len(), 11);
        assert!(run.conversation.messages().last().unwrap().is_routing());
    }

    #[tokio::test]
    async fn test_multi_selection_runs_only_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = EchoAgent::new("a", &log);
        let b = EchoAgent::new("b", &log);
        let router = Arc::new(SequenceRouter {
            names: vec![],
            calls: AtomicUsize::new(0),
            log: log.clone(),
        });
        // 第一轮双选，之后完成
        struct TwoThenDone(Arc<SequenceRouter>);
        #[async_trait]
        impl Router for TwoThenDone {
            async fn select_next(&self, c: &[Message]) -> Result<RoutingDecision, AgentError> {
                if c.iter().any(|m| m.role == Role::Agent && !m.is_routing()) {
                    return self.0.select_next(c).await;
                }
                Ok(delegate(&["a", "b"]))
            }
        }
        let ctl = controller(
            Arc::new(TwoThenDone(router)),
            vec![a.clone() as Arc<dyn Agent>, b.clone()],
            RunLimits::default(),
        );

        let run = ctl.run_sync("q", "s").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(a.runs.load(Ordering::SeqCst), 1);
        assert_eq!(b.runs.load(Ordering::SeqCst), 0);
        assert_eq!(run.final_result.as_deref(), Some("q-handled-by-a"));
    }

    #[tokio::test]
    async fn test_always_delegating_supervisor_hits_turn_budget() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = EchoAgent::new("a", &log);
        let router = Arc::new(FixedRouter {
            decision: delegate(&["a"]),
            calls: AtomicUsize::new(0),
        });
        let ctl = controller(router.clone(), vec![a.clone() as Arc<dyn Agent>], RunLimits::default());

        let run = ctl.run_sync("loop", "s").await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let err = run.error.unwrap();
        assert_eq!(err.kind, "turn_budget_exceeded");
        assert_eq!(run.turns, 10);
        assert_eq!(a.runs.load(Ordering::SeqCst), 10);
        assert_eq!(router.calls.load(Ordering::SeqCst), 11);
        assert!(run.final_result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_run() {
        let router = Arc::new(FixedRouter {
            decision: delegate(&["ghost"]),
            calls: AtomicUsize::new(0),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctl = controller(router, vec![EchoAgent::new("a", &log) as Arc<dyn Agent>], RunLimits::default());
        let run = ctl.run_sync("q", "s").await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, "unknown_agent_selected");
    }

    #[tokio::test]
    async fn test_exhausted_agent_is_rejected() {
        let router = Arc::new(FixedRouter {
            decision: delegate(&["a"]),
            calls: AtomicUsize::new(0),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = EchoAgent::new("a", &log);
        let ctl = controller(
            router,
            vec![a.clone() as Arc<dyn Agent>],
            RunLimits {
                turn_budget: 10,
                max_calls_per_agent: Some(2),
            },
        );
        let run = ctl.run_sync("q", "s").await.unwrap();
        assert_eq!(run.error.unwrap().kind, "unknown_agent_selected");
        assert_eq!(a.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_recorded_not_thrown() {
        let router = Arc::new(FixedRouter {
            decision: delegate(&["flaky"]),
            calls: AtomicUsize::new(0),
        });
        let ctl = controller(router, vec![Arc::new(FailingAgent) as Arc<dyn Agent>], RunLimits::default());
        let id = ctl.start("q", "s").await.unwrap();
        let run = wait_terminal(&ctl, &id).await;
        assert_eq!(run.status, RunStatus::Failed);
        let err = run.error.unwrap();
        assert_eq!(err.kind, "upstream_unavailable");
        assert!(err.message.contains("503"));
        assert_eq!(ctl.get_status(&id).await.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let router = Arc::new(FixedRouter {
            decision: RoutingDecision::Done {
                rationale: String::new(),
            },
            calls: AtomicUsize::new(0),
        });
        let ctl = controller(router, vec![], RunLimits::default());
        let err = ctl.start("   ", "s").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert!(ctl.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_cancels_and_does_not_resurrect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow = Arc::new(EchoAgent {
            name: "slow".into(),
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
            log: log.clone(),
        });
        let router = Arc::new(SequenceRouter {
            names: vec!["slow".into()],
            calls: AtomicUsize::new(0),
            log,
        });
        let ctl = controller(router, vec![slow.clone() as Arc<dyn Agent>], RunLimits::default());

        let id = ctl.start("q", "s").await.unwrap();
        for _ in 0..200 {
            if slow.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        ctl.delete(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(ctl.get_status(&id).await.unwrap_err(), AgentError::RunNotFound(id.clone()));
        assert!(ctl.store().is_empty().await);
        assert_eq!(ctl.delete(&id).await.unwrap_err().kind(), "run_not_found");
    }

    #[tokio::test]
    async fn test_abandoned_run_sync_still_finishes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow = Arc::new(EchoAgent {
            name: "slow".into(),
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
            log: log.clone(),
        });
        let router = Arc::new(SequenceRouter {
            names: vec!["slow".into()],
            calls: AtomicUsize::new(0),
            log,
        });
        let ctl = controller(router, vec![slow as Arc<dyn Agent>], RunLimits::default());

        // 调用方在第一轮中途放弃等待
        let waited = tokio::time::timeout(Duration::from_millis(50), ctl.run_sync("q", "s")).await;
        assert!(waited.is_err());

        let runs = ctl.list().await;
        assert_eq!(runs.len(), 1);
        let run = wait_terminal(&ctl, &runs[0].analysis_id).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.final_result.as_deref(), Some("q-handled-by-slow"));
    }

    #[tokio::test]
    async fn test_polled_transcript_grows_monotonically() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mk = |n: &str| {
            Arc::new(EchoAgent {
                name: n.into(),
                runs: AtomicUsize::new(0),
                delay: Duration::from_millis(15),
                log: log.clone(),
            }) as Arc<dyn Agent>
        };
        let router = Arc::new(SequenceRouter {
            names: vec!["x".into(), "y".into(), "z".into()],
            calls: AtomicUsize::new(0),
            log: log.clone(),
        });
        let ctl = controller(router, vec![mk("x"), mk("y"), mk("z")], RunLimits::default());

        let id = ctl.start("grow", "s").await.unwrap();
        let mut last = 0usize;
        loop {
            let run = ctl.get_result(&id).await.unwrap();
            assert!(run.conversation.len() >= last);
            last = run.conversation.len();
            if run.status.is_terminal() {
                assert_eq!(run.status, RunStatus::Completed);
                break;
            }
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        assert_eq!(ctl.list().await.len(), 1);
    }
}
