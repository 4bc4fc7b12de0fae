//! Method routing from JSON-RPC calls to the enforcer service.

use crate::protocol::{
    BoolResult, EmptyResult, HandleParams, HandleResult, INTERNAL_ERROR, INVALID_PARAMS,
    JsonRpcError, METHOD_NOT_FOUND, NamesResult, NewEnforcerParams, RoleParams, RuleParams, RulesResult,
};
use runtime::{Handle, Service};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

type CallResult = std::result::Result<Value, JsonRpcError>;

/// Run one method call against the service.
pub async fn dispatch(service: &Service, method: &str, params: Option<Value>) -> CallResult {
    match method {
        "newEnforcer" => {
            let p: NewEnforcerParams = parse(params)?;
            let handle = service
                .new_enforcer(&p.model_text, p.use_adapter)
                .await
                .map_err(fail)?;
            reply(HandleResult {
                handle: handle.get(),
            })
        }
        "enforce" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .enforce(Handle::from(p.handle), &p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "loadPolicy" => {
            let p: HandleParams = parse(params)?;
            service.load_policy(Handle::from(p.handle)).await.map_err(fail)?;
            reply(EmptyResult {})
        }
        "savePolicy" => {
            let p: HandleParams = parse(params)?;
            service.save_policy(Handle::from(p.handle)).await.map_err(fail)?;
            reply(EmptyResult {})
        }
        "addPolicy" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .add_policy(Handle::from(p.handle), p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "removePolicy" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .remove_policy(Handle::from(p.handle), p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "hasPolicy" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .has_policy(Handle::from(p.handle), p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "getPolicy" => {
            let p: HandleParams = parse(params)?;
            let rules = service.get_policy(Handle::from(p.handle)).await.map_err(fail)?;
            reply(RulesResult { rules })
        }
        "addGroupingPolicy" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .add_grouping_policy(Handle::from(p.handle), p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "removeGroupingPolicy" => {
            let p: RuleParams = parse(params)?;
            let result = service
                .remove_grouping_policy(Handle::from(p.handle), p.params)
                .await
                .map_err(fail)?;
            reply(BoolResult { result })
        }
        "getGroupingPolicy" => {
            let p: HandleParams = parse(params)?;
            let rules = service
                .get_grouping_policy(Handle::from(p.handle))
                .await
                .map_err(fail)?;
            reply(RulesResult { rules })
        }
        "getRolesForUser" => {
            let p: RoleParams = parse(params)?;
            let names = service
                .get_roles_for_user(Handle::from(p.handle), &p.name, p.domain.as_deref())
                .await
                .map_err(fail)?;
            reply(NamesResult { names })
        }
        "getUsersForRole" => {
            let p: RoleParams = parse(params)?;
            let names = service
                .get_users_for_role(Handle::from(p.handle), &p.name, p.domain.as_deref())
                .await
                .map_err(fail)?;
            reply(NamesResult { names })
        }
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn parse<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("invalid params: {e}")))
}

fn reply(result: impl Serialize) -> CallResult {
    serde_json::to_value(result)
        .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("encode result: {e}")))
}

fn fail(err: runtime::Error) -> JsonRpcError {
    JsonRpcError::from(&err)
}
