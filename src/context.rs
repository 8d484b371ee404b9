use std::sync::{ Arc, Condvar, Mutex, MutexGuard, Weak };
use std::time::{ Duration, Instant };

/// Deadline plus cancellation flag handed to every blocking operation.
///
/// Cancelling a context cancels every context derived from it with
/// [`Context::child`] or attached with [`Context::link`].
#[derive(Clone, Debug)]
pub struct Context
{
    inner: Arc<Inner>
}

#[derive(Debug)]
struct Inner
{
    deadline: Option<Instant>,
    state: Mutex<State>,
    signal: Condvar
}

#[derive(Debug, Default)]
struct State
{
    cancelled: bool,
    children: Vec<Weak<Inner>>
}

impl Inner
{
    fn lock(&self) -> MutexGuard<'_, State>
    {
        match self.state.lock()
        {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner()
        }
    }

    fn cancel(&self)
    {
        let children = {
            let mut state = self.lock();
            if state.cancelled
            {
                return;
            }

            state.cancelled = true;
            std::mem::take(&mut state.children)
        };

        self.signal.notify_all();

        for child in children
        {
            if let Some(child) = child.upgrade()
            {
                child.cancel();
            }
        }
    }
}

impl Context
{
    fn with_deadline(deadline: Option<Instant>) -> Context
    {
        Context
        {
            inner: Arc::new(Inner
            {
                deadline,
                state: Mutex::new(State::default()),
                signal: Condvar::new()
            })
        }
    }

    /// A context that is only done when cancelled.
    pub fn background() -> Context
    {
        Context::with_deadline(None)
    }

    /// A timeout too large to represent means no deadline.
    pub fn with_timeout(timeout: Duration) -> Context
    {
        Context::with_deadline(Instant::now().checked_add(timeout))
    }

    /// Derives a context that ends at the earlier of this context's deadline
    /// and `timeout` from now, and is cancelled together with this one.
    pub fn child(&self, timeout: Option<Duration>) -> Context
    {
        let own = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let deadline = match (self.inner.deadline, own)
        {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b)
        };

        let child = Context::with_deadline(deadline);
        self.link(&child);
        child
    }

    /// Cancels `other` whenever this context is cancelled.
    pub fn link(&self, other: &Context)
    {
        let cancelled = {
            let mut state = self.inner.lock();
            if !state.cancelled
            {
                state.children.retain(|child| child.strong_count() > 0);
                state.children.push(Arc::downgrade(&other.inner));
            }
            state.cancelled
        };

        if cancelled
        {
            other.cancel();
        }
    }

    pub fn cancel(&self)
    {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool
    {
        self.inner.lock().cancelled
    }

    pub fn deadline(&self) -> Option<Instant>
    {
        self.inner.deadline
    }

    /// Time left until the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration>
    {
        self.inner.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool
    {
        if self.is_cancelled()
        {
            return true;
        }

        match self.inner.deadline
        {
            Some(deadline) => Instant::now() >= deadline,
            None => false
        }
    }

    /// Blocks for at most `timeout`. Returns true when the context is done.
    pub fn wait(&self, timeout: Duration) -> bool
    {
        let until = match (Instant::now().checked_add(timeout), self.inner.deadline)
        {
            (Some(until), Some(deadline)) => Some(until.min(deadline)),
            (until, deadline) => until.or(deadline)
        };

        match until
        {
            Some(until) => self.wait_until(until),
            None => self.wait_done()
        }

        self.is_done()
    }

    /// Blocks until the context is cancelled or its deadline passes.
    pub fn wait_done(&self)
    {
        match self.inner.deadline
        {
            Some(deadline) => self.wait_until(deadline),
            None =>
            {
                let mut state = self.inner.lock();
                while !state.cancelled
                {
                    state = match self.inner.signal.wait(state)
                    {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner()
                    };
                }
            }
        }
    }

    fn wait_until(&self, until: Instant)
    {
        let mut state = self.inner.lock();

        while !state.cancelled
        {
            let now = Instant::now();
            if now >= until
            {
                break;
            }

            state = match self.inner.signal.wait_timeout(state, until - now)
            {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0
            };
        }
    }
}
