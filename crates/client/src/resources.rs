//! Typed queries over the data API, backed by the shared [`QueryCache`].

use std::marker::PhantomData;
use std::sync::Arc;

use cookbook_shared::{Cookbook, Ingredient, NetworkError, Recipe, User};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use crate::api_client::ApiClient;
use crate::query::{FetchResult, QueryCache, QueryConfig, QueryKey, QuerySnapshot, ResourceKind};

/// Payload stored in the cache. Shared behind `Arc` so snapshots stay cheap.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Cookbooks(Arc<Vec<Cookbook>>),
    Cookbook(Arc<Cookbook>),
    Recipes(Arc<Vec<Recipe>>),
    Recipe(Arc<Recipe>),
    Ingredients(Arc<Vec<Ingredient>>),
    Ingredient(Arc<Ingredient>),
    Users(Arc<Vec<User>>),
    User(Arc<User>),
}

/// A type that can be read out of [`ResourceData`].
pub trait Resource: Send + Sync + 'static {
    fn extract(data: ResourceData) -> Option<Arc<Self>>;
}

macro_rules! resource {
    ($ty:ty, $variant:ident) => {
        impl Resource for $ty {
            fn extract(data: ResourceData) -> Option<Arc<Self>> {
                match data {
                    ResourceData::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

resource!(Vec<Cookbook>, Cookbooks);
resource!(Cookbook, Cookbook);
resource!(Vec<Recipe>, Recipes);
resource!(Recipe, Recipe);
resource!(Vec<Ingredient>, Ingredients);
resource!(Ingredient, Ingredient);
resource!(Vec<User>, Users);
resource!(User, User);

/// Live view of one query.
pub struct QueryHandle<T> {
    key: Option<QueryKey>,
    rx: watch::Receiver<QuerySnapshot<ResourceData>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> QueryHandle<T> {
    fn new(key: QueryKey, rx: watch::Receiver<QuerySnapshot<ResourceData>>) -> Self {
        Self {
            key: Some(key),
            rx,
            _marker: PhantomData,
        }
    }

    /// A handle that never fetches: stays pending forever.
    fn disabled() -> Self {
        let (_, rx) = watch::channel(QuerySnapshot::pending());
        Self {
            key: None,
            rx,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> Option<&QueryKey> {
        self.key.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn current(&self) -> QuerySnapshot<Arc<T>> {
        self.rx.borrow().clone().and_then(T::extract)
    }

    /// Wait for the next change; `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<QuerySnapshot<Arc<T>>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone().and_then(T::extract))
    }

    /// Wait until no fetch is running and a result is available.
    pub async fn settled(&mut self) -> QuerySnapshot<Arc<T>> {
        let settled = self
            .rx
            .wait_for(QuerySnapshot::is_settled)
            .await
            .map(|s| s.clone());
        match settled {
            Ok(snapshot) => snapshot.and_then(T::extract),
            Err(_) => self.current(),
        }
    }
}

/// Typed entry points for every endpoint of the data API.
#[derive(Clone)]
pub struct Resources {
    api: ApiClient,
    cache: QueryCache<ResourceData>,
}

impl Resources {
    pub fn new(api: ApiClient, config: QueryConfig) -> Self {
        Self::with_cache(api, QueryCache::new(config))
    }

    pub fn with_cache(api: ApiClient, cache: QueryCache<ResourceData>) -> Self {
        Self { api, cache }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache<ResourceData> {
        &self.cache
    }

    fn fetcher(
        &self,
        key: QueryKey,
    ) -> impl Fn() -> BoxFuture<'static, FetchResult<ResourceData>> + Send + Sync + 'static {
        let api = self.api.clone();
        move || {
            let api = api.clone();
            let key = key.clone();
            async move { fetch_key(&api, &key).await }.boxed()
        }
    }

    fn watch<T: Resource>(&self, key: QueryKey) -> QueryHandle<T> {
        let rx = self.cache.query(key.clone(), self.fetcher(key.clone()));
        QueryHandle::new(key, rx)
    }

    fn watch_item<T: Resource>(&self, id: &str, key: impl FnOnce(String) -> QueryKey) -> QueryHandle<T> {
        let id = id.trim();
        if id.is_empty() {
            return QueryHandle::disabled();
        }
        self.watch(key(id.to_string()))
    }

    async fn load<T: Resource>(&self, key: QueryKey) -> Result<Arc<T>, NetworkError> {
        let data = self.cache.fetch(key.clone(), self.fetcher(key.clone())).await?;
        T::extract(data).ok_or_else(|| NetworkError::Deserialize(format!("unexpected payload for {key}")))
    }

    async fn load_item<T: Resource>(
        &self,
        id: &str,
        key: impl FnOnce(String) -> QueryKey,
    ) -> Result<Arc<T>, NetworkError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(NetworkError::InvalidRequest("missing id".into()));
        }
        self.load(key(id.to_string())).await
    }

    pub fn cookbooks(&self) -> QueryHandle<Vec<Cookbook>> {
        self.watch(QueryKey::cookbooks())
    }

    pub fn cookbook(&self, id: &str) -> QueryHandle<Cookbook> {
        self.watch_item(id, QueryKey::cookbook)
    }

    pub fn recipe(&self, id: &str) -> QueryHandle<Recipe> {
        self.watch_item(id, QueryKey::recipe)
    }

    pub fn recipes_by_cookbook(&self, cookbook_id: &str) -> QueryHandle<Vec<Recipe>> {
        self.watch_item(cookbook_id, QueryKey::recipes_by_cookbook)
    }

    pub fn ingredients(&self) -> QueryHandle<Vec<Ingredient>> {
        self.watch(QueryKey::ingredients())
    }

    pub fn ingredient(&self, id: &str) -> QueryHandle<Ingredient> {
        self.watch_item(id, QueryKey::ingredient)
    }

    pub fn users(&self) -> QueryHandle<Vec<User>> {
        self.watch(QueryKey::users())
    }

    pub fn user(&self, id: &str) -> QueryHandle<User> {
        self.watch_item(id, QueryKey::user)
    }

    pub async fn load_cookbooks(&self) -> Result<Arc<Vec<Cookbook>>, NetworkError> {
        self.load(QueryKey::cookbooks()).await
    }

    pub async fn load_cookbook(&self, id: &str) -> Result<Arc<Cookbook>, NetworkError> {
        self.load_item(id, QueryKey::cookbook).await
    }

    pub async fn load_recipe(&self, id: &str) -> Result<Arc<Recipe>, NetworkError> {
        self.load_item(id, QueryKey::recipe).await
    }

    pub async fn load_recipes_by_cookbook(
        &self,
        cookbook_id: &str,
    ) -> Result<Arc<Vec<Recipe>>, NetworkError> {
        self.load_item(cookbook_id, QueryKey::recipes_by_cookbook).await
    }

    pub async fn load_ingredients(&self) -> Result<Arc<Vec<Ingredient>>, NetworkError> {
        self.load(QueryKey::ingredients()).await
    }

    pub async fn load_ingredient(&self, id: &str) -> Result<Arc<Ingredient>, NetworkError> {
        self.load_item(id, QueryKey::ingredient).await
    }

    pub async fn load_users(&self) -> Result<Arc<Vec<User>>, NetworkError> {
        self.load(QueryKey::users()).await
    }

    pub async fn load_user(&self, id: &str) -> Result<Arc<User>, NetworkError> {
        self.load_item(id, QueryKey::user).await
    }

    /// Refetch `key` now, superseding any fetch already running.
    pub async fn refresh(&self, key: &QueryKey) -> FetchResult<ResourceData> {
        self.cache.refresh(key.clone(), self.fetcher(key.clone())).await
    }

    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_resource(&self, resource: ResourceKind) -> usize {
        self.cache.invalidate_resource(resource)
    }

    /// Forget everything cached, e.g. after the user signs out.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

async fn fetch_key(api: &ApiClient, key: &QueryKey) -> FetchResult<ResourceData> {
    use ResourceKind as K;

    let data = match (key.resource, key.id.as_deref()) {
        (K::Cookbook, None) => ResourceData::Cookbooks(Arc::new(api.cookbooks().await?)),
        (K::Cookbook, Some(id)) => ResourceData::Cookbook(Arc::new(api.cookbook(id).await?)),
        (K::Recipe, Some(id)) => ResourceData::Recipe(Arc::new(api.recipe(id).await?)),
        (K::Recipe, None) => {
            let recipes: Vec<Recipe> = match key.param("cookbookId") {
                Some(cookbook_id) => api.recipes_by_cookbook(cookbook_id).await?,
                None => api.get_json(&key.path()).await?,
            };
            ResourceData::Recipes(Arc::new(recipes))
        }
        (K::Ingredient, None) => ResourceData::Ingredients(Arc::new(api.ingredients().await?)),
        (K::Ingredient, Some(id)) => ResourceData::Ingredient(Arc::new(api.ingredient(id).await?)),
        (K::User, None) => ResourceData::Users(Arc::new(api.users().await?)),
        (K::User, Some(id)) => ResourceData::User(Arc::new(api.user(id).await?)),
    };
    Ok(data)
}
