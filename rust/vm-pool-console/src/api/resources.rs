//! VM resource pool controller.
//!
//! Serves `/resources/*`: listing, detail tabs, JSON feeds for the VM and
//! user grids, the new/edit forms, and the create, update, delete, destroy
//! and bulk VM action endpoints. Every handler works on behalf of the
//! [`AuthenticatedUser`] the auth middleware attached to the request.
//!
//! Write endpoints catch storage failures and answer with an
//! acknowledgment, a redirect or a confirmation view; nothing past the
//! handler boundary sees a [`DatabaseError`].

use std::collections::BTreeMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api::views::{
    ConfirmationView, FormView, Layout, ListView, PermissionRow, PoolAck, PoolView, VmRow,
};
use crate::database::{
    ActionOutcome, DatabaseError, PermissionRepository, PoolRepository, SqliteBackend, VmRepository,
};
use crate::domain::{
    Pool, PoolAttributes, PoolId, PoolKind, PoolPermissions, PoolSummary, Privilege, Role,
    VmAction, VmId, bulk_action_values, single_vm_action_menu,
};
use crate::gateway::{AuthenticatedUser, Flash, redirect};

/// Path of the list view.
pub const LIST_PATH: &str = "/resources/list";

pub const VIEW_DENIED: &str =
    "You do not have permission to view this VM Resource Pool: redirecting to top level";
pub const MODIFY_DENIED: &str = "You do not have permission to modify this VM Resource Pool.";
pub const CREATE_DENIED: &str = "You do not have permission to create a VM Resource Pool here.";
pub const VM_CONTROL_DENIED: &str =
    "You do not have permission to control virtual machines in this VM Resource Pool.";
pub const CREATED: &str = "Virtual Machine Pool was successfully created.";
pub const UPDATED: &str = "VM Resource Pool was successfully updated.";
pub const DELETE_FAILED: &str = "Error in deleting Virtual Machine Pools.";
pub const QUEUE_FAILED: &str = "Error queueing VM actions.";

/// Create the resources router.
///
/// `create`, `update` and `destroy` only act on POST; any other method on
/// them redirects to the list.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/resources", get(list))
        .route("/resources/list", get(list))
        .route("/resources/show/{id}", get(show))
        .route("/resources/quick_summary/{id}", get(quick_summary))
        .route("/resources/show_vms/{id}", get(show_vms))
        .route("/resources/show_users/{id}", get(show_users))
        .route("/resources/vms_json/{id}", get(vms_json))
        .route("/resources/users_json/{id}", get(users_json))
        .route("/resources/new", get(new_form))
        .route("/resources/create", post(create).fallback(redirect_to_list))
        .route("/resources/edit/{id}", get(edit))
        .route("/resources/update/{id}", post(update).fallback(redirect_to_list))
        .route("/resources/delete", post(delete))
        .route("/resources/destroy/{id}", post(destroy).fallback(redirect_to_list))
        .route("/resources/vm_actions/{id}", post(vm_actions))
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// An id submitted either as a JSON number or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdParam {
    Number(i64),
    Text(String),
}

impl IdParam {
    fn parse(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShowParams {
    /// Any value selects the embedded tab layout.
    pub ajax: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewParams {
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRequest {
    pub parent_id: IdParam,
    #[serde(default)]
    pub vm_resource_pool: PoolAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    #[serde(default)]
    pub vm_resource_pool: PoolAttributes,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    /// Comma-separated pool ids.
    pub vm_pool_ids: String,
}

#[derive(Debug, Deserialize)]
pub struct VmActionsRequest {
    pub vm_action: String,
    /// Comma-separated VM ids.
    pub vm_ids: String,
}

/// Parse `"1, 2,3"` into ids. Empty segments are skipped; any other
/// non-numeric segment, or no ids at all, is an error.
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, String> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|e| format!("'{s}' is not a valid id: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err("no ids given".to_string());
    }
    Ok(ids)
}

fn parse_path_id(raw: &str) -> Option<PoolId> {
    raw.trim().parse().ok()
}

// ---------------------------------------------------------------------------
// Errors and per-request context
// ---------------------------------------------------------------------------

/// Ways a controller action ends early.
#[derive(Debug)]
enum ControllerError {
    /// The user may not view the pool, or it does not exist.
    ViewDenied,
    /// The user lacks a privilege; send them to `redirect_to`.
    Denied {
        redirect_to: String,
        message: &'static str,
    },
    Database(DatabaseError),
}

impl From<DatabaseError> for ControllerError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        match self {
            Self::ViewDenied => redirect(LIST_PATH, Some(Flash::notice(VIEW_DENIED))),
            Self::Denied {
                redirect_to,
                message,
            } => redirect(&redirect_to, Some(Flash::notice(message))),
            Self::Database(e) => {
                tracing::error!(error = %e, "Storage failure while rendering view");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "storage_error",
                        message: "The console database could not be read.".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// A VM pool resolved for the acting user.
#[derive(Debug)]
struct PoolContext {
    pool: Pool,
    parent: Option<Pool>,
    permissions: PoolPermissions,
    /// Whether the user may modify the parent pool.
    is_hwpool_admin: bool,
}

impl PoolContext {
    /// Load VM pool `raw_id` and the user's standing on it and its parent.
    ///
    /// An unparsable id, a missing pool, or a pool of another kind all end
    /// in [`ControllerError::ViewDenied`].
    async fn resolve(db: &SqliteBackend, uid: &str, raw_id: &str) -> Result<Self, ControllerError> {
        let id = parse_path_id(raw_id).ok_or(ControllerError::ViewDenied)?;
        let pool = db
            .find_pool(id)
            .await?
            .filter(Pool::is_vm_pool)
            .ok_or(ControllerError::ViewDenied)?;
        let permissions = PoolPermissions::from(db.privileges(uid, pool.id).await?);

        let (parent, is_hwpool_admin) = match pool.parent_id {
            Some(parent_id) => {
                let parent = db.find_pool(parent_id).await?;
                let admin = db.privileges(uid, parent_id).await?.has(Privilege::Modify);
                (parent, admin)
            }
            None => (None, false),
        };

        Ok(Self {
            pool,
            parent,
            permissions,
            is_hwpool_admin,
        })
    }

    fn ensure_view(&self) -> Result<(), ControllerError> {
        if self.permissions.can_view {
            Ok(())
        } else {
            Err(ControllerError::ViewDenied)
        }
    }

    /// Editing and removing a pool needs modify on its parent.
    fn ensure_parent_modify(&self) -> Result<(), ControllerError> {
        if self.is_hwpool_admin {
            Ok(())
        } else {
            Err(ControllerError::Denied {
                redirect_to: self.pool.show_path(),
                message: MODIFY_DENIED,
            })
        }
    }

    fn ensure_vm_control(&self) -> Result<(), ControllerError> {
        if self.permissions.can_control_vms {
            Ok(())
        } else {
            Err(ControllerError::Denied {
                redirect_to: self.pool.show_path(),
                message: VM_CONTROL_DENIED,
            })
        }
    }

    fn view(self, layout: Layout, template: &'static str, flash: Option<Flash>) -> PoolView {
        PoolView {
            layout,
            template,
            flash,
            current_pool_id: self.pool.id,
            parent: self.parent.as_ref().map(PoolSummary::from),
            vm_resource_pool: self.pool,
            permissions: self.permissions,
            is_hwpool_admin: self.is_hwpool_admin,
            action_values: None,
            actions: None,
            roles: None,
        }
    }

    fn edit_form(&self, attributes: PoolAttributes, errors: Vec<String>, flash: Option<Flash>) -> Option<FormView> {
        let parent = self.parent.as_ref()?;
        Some(FormView {
            layout: Layout::Default,
            template: "edit",
            flash,
            parent: PoolSummary::from(parent),
            vm_resource_pool: Some(self.pool.clone()),
            attributes,
            errors,
        })
    }
}

fn detail_layout(params: &ShowParams) -> Layout {
    if params.ajax.is_some() {
        Layout::TabsAndContent
    } else {
        Layout::Default
    }
}

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

async fn redirect_to_list() -> Response {
    redirect(LIST_PATH, None)
}

/// Every VM in every VM pool the user may view.
async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let db = &state.database;
    let pools = db.list_pools_for_user(&user.uid, Privilege::View).await?;
    let vms = db.vms_in_pools(pools.iter().map(|p| p.id).collect()).await?;

    let unique: BTreeMap<VmId, VmRow> = vms.iter().map(|vm| (vm.id, VmRow::from(vm))).collect();

    let (jar, flash) = Flash::take(jar);
    let view = ListView {
        layout: Layout::Default,
        flash,
        user: user.uid,
        vm_resource_pools: pools.iter().map(PoolSummary::from).collect(),
        vms: unique.into_values().collect(),
        action_values: bulk_action_values(),
    };
    Ok((jar, Json(view)).into_response())
}

async fn show(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<ShowParams>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let (jar, flash) = Flash::take(jar);
    let mut view = ctx.view(detail_layout(&params), "show", flash);
    view.action_values = Some(bulk_action_values());
    Ok((jar, Json(view)).into_response())
}

async fn quick_summary(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let (jar, flash) = Flash::take(jar);
    let view = ctx.view(Layout::Selection, "quick_summary", flash);
    Ok((jar, Json(view)).into_response())
}

async fn show_vms(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<ShowParams>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let (jar, flash) = Flash::take(jar);
    let mut view = ctx.view(detail_layout(&params), "show_vms", flash);
    view.action_values = Some(bulk_action_values());
    view.actions = Some(single_vm_action_menu());
    Ok((jar, Json(view)).into_response())
}

async fn show_users(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(params): Query<ShowParams>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let (jar, flash) = Flash::take(jar);
    let mut view = ctx.view(detail_layout(&params), "show_users", flash);
    view.action_values = Some(bulk_action_values());
    view.roles = Some(Role::keys());
    Ok((jar, Json(view)).into_response())
}

async fn vms_json(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VmRow>>, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let vms = state.database.vms_in_pools(vec![ctx.pool.id]).await?;
    Ok(Json(vms.iter().map(VmRow::from).collect()))
}

async fn users_json(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PermissionRow>>, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_view()?;

    let grants = state.database.permissions_for_pool(ctx.pool.id).await?;
    Ok(Json(grants.iter().map(PermissionRow::from).collect()))
}

// ---------------------------------------------------------------------------
// Forms
// ---------------------------------------------------------------------------

/// Empty form for a new VM pool under `parent_id`.
async fn new_form(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<NewParams>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let db = &state.database;
    let parent_id = params
        .parent_id
        .as_deref()
        .and_then(parse_path_id)
        .ok_or(ControllerError::ViewDenied)?;
    let parent = db.find_pool(parent_id).await?.ok_or(ControllerError::ViewDenied)?;

    if !db.privileges(&user.uid, parent.id).await?.has(Privilege::Modify) {
        return Err(ControllerError::Denied {
            redirect_to: parent.show_path(),
            message: CREATE_DENIED,
        });
    }

    let (jar, flash) = Flash::take(jar);
    let view = FormView {
        layout: Layout::Popup,
        template: "new",
        flash,
        parent: PoolSummary::from(&parent),
        vm_resource_pool: None,
        attributes: PoolAttributes::default(),
        errors: Vec::new(),
    };
    Ok((jar, Json(view)).into_response())
}

async fn edit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    jar: CookieJar,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_parent_modify()?;

    let (jar, flash) = Flash::take(jar);
    let attributes = PoolAttributes {
        name: Some(ctx.pool.name.clone()),
        description: ctx.pool.description.clone(),
    };
    let view = ctx
        .edit_form(attributes, Vec::new(), flash)
        .ok_or(ControllerError::ViewDenied)?;
    Ok((jar, Json(view)).into_response())
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Create a VM pool. Always answers with a [`PoolAck`].
async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Json<PoolAck> {
    let db = &state.database;
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return Json(PoolAck::errors(vec![rejection.body_text()])),
    };

    let Some(parent_id) = request.parent_id.parse() else {
        return Json(PoolAck::errors(vec!["Parent pool id is not a number".to_string()]));
    };

    let allowed = match db.privileges(&user.uid, parent_id).await {
        Ok(set) => set.has(Privilege::Modify),
        Err(e) => {
            tracing::error!(user = %user.uid, parent_id, error = %e, "Failed to load privileges");
            false
        }
    };
    if !allowed {
        tracing::warn!(user = %user.uid, parent_id, "VM pool creation denied");
        return Json(PoolAck::errors(vec![CREATE_DENIED.to_string()]).with_alert(CREATE_DENIED));
    }

    match db
        .create_pool(PoolKind::VmResource, parent_id, request.vm_resource_pool)
        .await
    {
        Ok(pool) => {
            tracing::info!(user = %user.uid, pool_id = pool.id, parent_id, name = %pool.name, "VM pool created");
            Json(PoolAck::success(CREATED))
        }
        Err(DatabaseError::Invalid(errors)) => Json(PoolAck::errors(errors.into_messages())),
        Err(DatabaseError::NotFound { .. }) => {
            Json(PoolAck::errors(vec![format!("Parent pool {parent_id} does not exist")]))
        }
        Err(e) => {
            tracing::error!(user = %user.uid, parent_id, error = %e, "VM pool creation failed");
            Json(PoolAck::errors(vec![
                "Virtual Machine Pool could not be saved.".to_string(),
            ]))
        }
    }
}

/// Apply attribute changes, then show the pool; re-render the form on failure.
async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_parent_modify()?;

    let attributes = match body {
        Ok(Json(request)) => request.vm_resource_pool,
        Err(rejection) => {
            return Ok(invalid_form(&ctx, PoolAttributes::default(), vec![rejection.body_text()]));
        }
    };

    match state.database.update_pool(ctx.pool.id, attributes.clone()).await {
        Ok(pool) => {
            tracing::info!(user = %user.uid, pool_id = pool.id, "VM pool updated");
            Ok(redirect(&pool.show_path(), Some(Flash::notice(UPDATED))))
        }
        Err(DatabaseError::Invalid(errors)) => Ok(invalid_form(&ctx, attributes, errors.into_messages())),
        Err(e) => {
            tracing::error!(user = %user.uid, pool_id = ctx.pool.id, error = %e, "VM pool update failed");
            Ok(invalid_form(
                &ctx,
                attributes,
                vec!["VM Resource Pool could not be saved.".to_string()],
            ))
        }
    }
}

fn invalid_form(ctx: &PoolContext, attributes: PoolAttributes, errors: Vec<String>) -> Response {
    match ctx.edit_form(attributes, errors, None) {
        Some(view) => (StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response(),
        None => redirect(LIST_PATH, None),
    }
}

/// Remove a batch of VM pools in one transaction.
async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Json<PoolAck> {
    let ids = match body {
        Ok(Json(request)) => parse_id_list(&request.vm_pool_ids),
        Err(rejection) => Err(rejection.body_text()),
    };
    let ids = match ids {
        Ok(ids) => ids,
        Err(reason) => {
            tracing::warn!(user = %user.uid, reason = %reason, "Rejected bulk pool delete");
            return Json(PoolAck::alert(DELETE_FAILED));
        }
    };

    match state.database.destroy_vm_pools(&user.uid, ids.clone()).await {
        Ok(names) => {
            tracing::info!(user = %user.uid, pool_ids = ?ids, "VM pools deleted");
            Json(PoolAck::success(format!(
                "Virtual Machine Pools {} were successfully deleted.",
                names.join(", ")
            )))
        }
        Err(e) => {
            tracing::warn!(user = %user.uid, pool_ids = ?ids, error = %e, "Bulk pool delete rolled back");
            Json(PoolAck::alert(DELETE_FAILED))
        }
    }
}

/// Remove one pool and go to its parent.
async fn destroy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_parent_modify()?;

    match state.database.destroy_pool(ctx.pool.id).await {
        Ok(pool) => {
            tracing::info!(user = %user.uid, pool_id = pool.id, "VM pool destroyed");
            let location = ctx
                .parent
                .as_ref()
                .map_or_else(|| LIST_PATH.to_string(), Pool::show_path);
            Ok(redirect(&location, None))
        }
        Err(e) => {
            tracing::warn!(user = %user.uid, pool_id = ctx.pool.id, error = %e, "VM pool destroy refused");
            let message = match e {
                DatabaseError::Conflict(reason) => {
                    format!("Error in deleting VM Resource Pool: {reason}.")
                }
                _ => "Error in deleting VM Resource Pool.".to_string(),
            };
            Ok(redirect(&ctx.pool.show_path(), Some(Flash::error(message))))
        }
    }
}

/// Queue one action on a batch of VMs and confirm what happened.
///
/// Any failure while queueing, including an unknown VM or action, rolls the
/// whole batch back and reports empty lists with an error message.
async fn vm_actions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    jar: CookieJar,
    body: Result<Json<VmActionsRequest>, JsonRejection>,
) -> Result<Response, ControllerError> {
    let ctx = PoolContext::resolve(&state.database, &user.uid, &id).await?;
    ctx.ensure_vm_control()?;

    let (jar, pending) = Flash::take(jar);
    let token = body
        .as_ref()
        .map(|request| request.vm_action.clone())
        .unwrap_or_default();

    let outcome = match body {
        Ok(Json(request)) => queue_actions(&state.database, &user, &request).await,
        Err(rejection) => Err(rejection.body_text()),
    };

    let (success_list, failure_list, flash) = match outcome {
        Ok(outcome) => (
            outcome.succeeded.iter().map(VmRow::from).collect(),
            outcome.failed.iter().map(VmRow::from).collect(),
            pending,
        ),
        Err(reason) => {
            tracing::warn!(user = %user.uid, pool_id = ctx.pool.id, action = %token, reason = %reason, "VM actions not queued");
            (Vec::new(), Vec::new(), Some(Flash::error(QUEUE_FAILED)))
        }
    };

    let view = ConfirmationView {
        layout: Layout::Confirmation,
        flash,
        vm_resource_pool: PoolSummary::from(&ctx.pool),
        action_label: VmAction::label_for(&token),
        action: token,
        success_list,
        failure_list,
    };
    Ok((jar, Json(view)).into_response())
}

async fn queue_actions(
    db: &SqliteBackend,
    user: &AuthenticatedUser,
    request: &VmActionsRequest,
) -> Result<ActionOutcome, String> {
    let action: VmAction = request.vm_action.parse().map_err(|e| format!("{e}"))?;
    let ids = parse_id_list(&request.vm_ids)?;
    let outcome = db
        .queue_vm_actions(&user.uid, action, ids)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(
        user = %user.uid,
        action = %action,
        queued = outcome.succeeded.len(),
        refused = outcome.failed.len(),
        "VM actions queued"
    );
    Ok(outcome)
}
