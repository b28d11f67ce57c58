// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, env var credentials, discovery and target resolution.

use stagehand::config::*;
use stagehand::deploy::{DeployErrorKind, TargetResolver};
use stagehand::types::{EnvironmentName, ServiceId};

const CONFIG: &str = r#"
state_dir: state
environments:
  staging:
    api:
      ssh: deploy@10.0.0.5:2222
      port: 8080
      credential:
        env: STAGEHAND_TEST_KEY
        default: /keys/fallback
    web:
      ssh:
        host: web-1.internal
        user: deploy
        trust_first_connection: true
      base_url: https://web.staging.example.com/
  local:
    site:
      transport: local
      base_url: http://127.0.0.1:3000
"#;

fn env(name: &str) -> EnvironmentName {
    EnvironmentName::new(name).unwrap()
}

fn svc(name: &str) -> ServiceId {
    ServiceId::new(name).unwrap()
}

mod parsing {
    use super::*;

    #[test]
    fn parse_environment_table() {
        let config = Config::from_yaml(CONFIG).unwrap();
        assert_eq!(config.environments.len(), 2);
        assert!(config.lock);

        let staging = config.environment(&env("staging")).unwrap();
        let api = &staging[&svc("api")];
        assert_eq!(api.transport, TransportKind::Ssh);
        assert_eq!(api.port, Some(8080));
        assert_eq!(api.base_url().as_deref(), Some("http://10.0.0.5:8080"));
        assert_eq!(api.state_dir, DEFAULT_REMOTE_STATE_DIR);

        let web = &staging[&svc("web")];
        assert!(web.ssh.as_ref().unwrap().trust_first_connection);
        assert_eq!(
            web.base_url().as_deref(),
            Some("https://web.staging.example.com")
        );
    }

    #[test]
    fn ssh_target_requires_endpoint() {
        let yaml = r#"
environments:
  staging:
    api:
      port: 8080
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("requires an `ssh` endpoint"));
    }

    #[test]
    fn local_target_rejects_endpoint() {
        let yaml = r#"
environments:
  dev:
    api:
      transport: local
      ssh: example.com
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn invalid_service_name_rejected() {
        let yaml = r#"
environments:
  staging:
    Bad_Name:
      transport: local
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn non_http_base_url_rejected() {
        let yaml = r#"
environments:
  dev:
    api:
      transport: local
      base_url: ftp://nope
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }
}

mod server_parsing {
    use super::*;

    #[test]
    fn parse_simple_host() {
        let server = ServerConfig::parse("example.com").unwrap();
        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, 22);
        assert!(server.user.is_none());
    }

    #[test]
    fn parse_full_format() {
        let server = ServerConfig::parse("deploy@example.com:2222").unwrap();
        assert_eq!(server.host, "example.com");
        assert_eq!(server.port, 2222);
        assert_eq!(server.user, Some("deploy".to_string()));
        assert_eq!(server.endpoint(), "deploy@example.com:2222");
    }

    #[test]
    fn reject_empty_user() {
        assert!(ServerConfig::parse("@example.com").is_err());
    }
}

mod credentials {
    use super::*;

    #[test]
    fn credential_from_environment() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let resolver = TargetResolver::new(&config);

        temp_env::with_var("STAGEHAND_TEST_KEY", Some("/keys/from-env"), || {
            let target = resolver.resolve(&env("staging"), &svc("api")).unwrap();
            assert_eq!(
                target.key_path.as_deref(),
                Some(std::path::Path::new("/keys/from-env"))
            );
        });
    }

    #[test]
    fn credential_falls_back_to_default() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let resolver = TargetResolver::new(&config);

        temp_env::with_var_unset("STAGEHAND_TEST_KEY", || {
            let target = resolver.resolve(&env("staging"), &svc("api")).unwrap();
            assert_eq!(
                target.key_path.as_deref(),
                Some(std::path::Path::new("/keys/fallback"))
            );
        });
    }

    #[test]
    fn missing_credential_var_is_target_error() {
        let yaml = r#"
environments:
  staging:
    api:
      ssh: deploy@10.0.0.5
      credential:
        env: STAGEHAND_TEST_MISSING_KEY
"#;
        let config = Config::from_yaml(yaml).unwrap();
        temp_env::with_var_unset("STAGEHAND_TEST_MISSING_KEY", || {
            let err = TargetResolver::new(&config)
                .resolve(&env("staging"), &svc("api"))
                .unwrap_err();
            assert_eq!(err.kind(), DeployErrorKind::InvalidPlan);
            assert!(err.to_string().contains("STAGEHAND_TEST_MISSING_KEY"));
        });
    }
}

mod resolution {
    use super::*;

    #[test]
    fn unknown_environment_and_service_are_distinct() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let resolver = TargetResolver::new(&config);

        let err = resolver.resolve(&env("prod"), &svc("api")).unwrap_err();
        assert_eq!(err.kind(), DeployErrorKind::UnknownEnvironment);

        let err = resolver.resolve(&env("staging"), &svc("db")).unwrap_err();
        assert_eq!(err.kind(), DeployErrorKind::UnknownService);
    }

    #[test]
    fn local_target_resolves_to_localhost() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let target = TargetResolver::new(&config)
            .resolve(&env("local"), &svc("site"))
            .unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.endpoint_key(), "local");
        assert_eq!(target.id.as_str(), "local/site");
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discovers_dot_stagehand_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".stagehand")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME_DIR), CONFIG).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        // relative state_dir belongs to the project root
        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.state_dir(), dir.path().join("state"));
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
